//! SQL schema for the orchestrator's persisted state (`spec.md` §6).
//!
//! The teacher workspace is purely file-backed; this module supplements
//! it with a small `rusqlite` (bundled SQLite) database so the
//! `nodes`/`workspaces`/.../`persistent_agent_events` tables in §6 have
//! somewhere to live, without introducing a server process — consistent
//! with the rest of this workspace's "zero-config, file-backed"
//! philosophy (see DESIGN.md).

/// Ordered list of idempotent migrations, applied in order by
/// [`super::migrations::apply_migrations`]. Each migration is wrapped in
/// `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS` so re-running
/// the whole list against an up-to-date database is a no-op.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_nodes", MIGRATION_0001_NODES),
    ("0002_workspaces", MIGRATION_0002_WORKSPACES),
    ("0003_agents", MIGRATION_0003_AGENTS),
    ("0004_accounts", MIGRATION_0004_ACCOUNTS),
    ("0005_queue_items", MIGRATION_0005_QUEUE_ITEMS),
    ("0006_events", MIGRATION_0006_EVENTS),
    ("0007_alerts", MIGRATION_0007_ALERTS),
    ("0008_transcripts", MIGRATION_0008_TRANSCRIPTS),
    ("0009_approvals", MIGRATION_0009_APPROVALS),
    ("0010_port_allocations", MIGRATION_0010_PORT_ALLOCATIONS),
    ("0011_loops", MIGRATION_0011_LOOPS),
    ("0012_loop_runs", MIGRATION_0012_LOOP_RUNS),
    ("0013_loop_kv", MIGRATION_0013_LOOP_KV),
    ("0014_loop_work_state", MIGRATION_0014_LOOP_WORK_STATE),
    ("0015_teams", MIGRATION_0015_TEAMS),
    ("0016_team_members", MIGRATION_0016_TEAM_MEMBERS),
    ("0017_team_tasks", MIGRATION_0017_TEAM_TASKS),
    ("0018_team_task_events", MIGRATION_0018_TEAM_TASK_EVENTS),
    ("0019_persistent_agents", MIGRATION_0019_PERSISTENT_AGENTS),
    (
        "0020_persistent_agent_events",
        MIGRATION_0020_PERSISTENT_AGENT_EVENTS,
    ),
];

// SQLite has no generic trigger macros, so the "keep updated_at fresh"
// trigger is spelled out per table below rather than shared.

const MIGRATION_0001_NODES: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    ssh_target TEXT,
    is_local INTEGER NOT NULL DEFAULT 0,
    execution_mode TEXT NOT NULL DEFAULT 'auto',
    status TEXT NOT NULL DEFAULT 'unknown',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
CREATE TRIGGER IF NOT EXISTS trg_nodes_updated_at
AFTER UPDATE ON nodes
BEGIN
    UPDATE nodes SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0002_WORKSPACES: &str = r#"
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    node_id TEXT NOT NULL REFERENCES nodes(id),
    repo_path TEXT NOT NULL,
    multiplexer_session TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_workspaces_node_id ON workspaces(node_id);
CREATE TRIGGER IF NOT EXISTS trg_workspaces_updated_at
AFTER UPDATE ON workspaces
BEGIN
    UPDATE workspaces SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0003_AGENTS: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id),
    pane TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'starting',
    state_confidence TEXT NOT NULL DEFAULT 'low',
    state_reason TEXT,
    state_detected_at TEXT,
    paused_until TEXT,
    last_activity_at TEXT,
    account_id TEXT REFERENCES accounts(id),
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    UNIQUE(workspace_id, pane)
);
CREATE INDEX IF NOT EXISTS idx_agents_state ON agents(state);
CREATE INDEX IF NOT EXISTS idx_agents_workspace_id ON agents(workspace_id);
CREATE TRIGGER IF NOT EXISTS trg_agents_updated_at
AFTER UPDATE ON agents
BEGIN
    UPDATE agents SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0004_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    pool_id TEXT,
    profile_id TEXT NOT NULL,
    credential_ref TEXT NOT NULL,
    cooldown_until TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_accounts_pool_id ON accounts(pool_id);
CREATE TRIGGER IF NOT EXISTS trg_accounts_updated_at
AFTER UPDATE ON accounts
BEGIN
    UPDATE accounts SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0005_QUEUE_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id),
    item_type TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    payload TEXT NOT NULL DEFAULT '{}',
    error TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    next_retry_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_queue_items_agent_position ON queue_items(agent_id, position);
CREATE INDEX IF NOT EXISTS idx_queue_items_status ON queue_items(status);
CREATE TRIGGER IF NOT EXISTS trg_queue_items_updated_at
AFTER UPDATE ON queue_items
BEGIN
    UPDATE queue_items SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0006_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    payload TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
"#;

const MIGRATION_0007_ALERTS: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_alerts_entity ON alerts(entity_type, entity_id);
"#;

const MIGRATION_0008_TRANSCRIPTS: &str = r#"
CREATE TABLE IF NOT EXISTS transcripts (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id),
    captured_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    snippet TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transcripts_agent_id ON transcripts(agent_id);
"#;

const MIGRATION_0009_APPROVALS: &str = r#"
CREATE TABLE IF NOT EXISTS approvals (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id),
    prompt TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    resolved_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_approvals_agent_id ON approvals(agent_id);
"#;

const MIGRATION_0010_PORT_ALLOCATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS port_allocations (
    node_id TEXT NOT NULL REFERENCES nodes(id),
    port INTEGER NOT NULL,
    agent_id TEXT REFERENCES agents(id),
    allocated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    released_at TEXT,
    PRIMARY KEY (node_id, port)
);
CREATE INDEX IF NOT EXISTS idx_port_allocations_agent_id ON port_allocations(agent_id);
"#;

const MIGRATION_0011_LOOPS: &str = r#"
CREATE TABLE IF NOT EXISTS loops (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    repo_path TEXT NOT NULL,
    profile_id TEXT,
    pool_id TEXT,
    base_prompt TEXT NOT NULL,
    interval_seconds INTEGER NOT NULL DEFAULT 0,
    max_iterations INTEGER NOT NULL DEFAULT 0,
    max_runtime_seconds INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    stop_config TEXT NOT NULL DEFAULT '{}',
    state TEXT NOT NULL DEFAULT 'stopped',
    iteration_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_loops_state ON loops(state);
CREATE TRIGGER IF NOT EXISTS trg_loops_updated_at
AFTER UPDATE ON loops
BEGIN
    UPDATE loops SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0012_LOOP_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS loop_runs (
    id TEXT PRIMARY KEY,
    loop_id TEXT NOT NULL REFERENCES loops(id),
    profile_id TEXT,
    prompt_source TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    exit_code INTEGER,
    stdout_tail TEXT,
    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_loop_runs_loop_id ON loop_runs(loop_id);
"#;

const MIGRATION_0013_LOOP_KV: &str = r#"
CREATE TABLE IF NOT EXISTS loop_kv (
    loop_id TEXT NOT NULL REFERENCES loops(id),
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (loop_id, key)
);
"#;

const MIGRATION_0014_LOOP_WORK_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS loop_work_state (
    loop_id TEXT NOT NULL REFERENCES loops(id),
    task TEXT NOT NULL,
    is_current INTEGER NOT NULL DEFAULT 1,
    state TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    PRIMARY KEY (loop_id, task)
);
"#;

const MIGRATION_0015_TEAMS: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    project_id TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
"#;

const MIGRATION_0016_TEAM_MEMBERS: &str = r#"
CREATE TABLE IF NOT EXISTS team_members (
    team_id TEXT NOT NULL REFERENCES teams(id),
    agent_name TEXT NOT NULL,
    backend_type TEXT NOT NULL DEFAULT 'generic',
    joined_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    PRIMARY KEY (team_id, agent_name)
);
"#;

const MIGRATION_0017_TEAM_TASKS: &str = r#"
CREATE TABLE IF NOT EXISTS team_tasks (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL REFERENCES teams(id),
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    owner TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_team_tasks_team_id ON team_tasks(team_id);
CREATE TRIGGER IF NOT EXISTS trg_team_tasks_updated_at
AFTER UPDATE ON team_tasks
BEGIN
    UPDATE team_tasks SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0018_TEAM_TASK_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS team_task_events (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES team_tasks(id),
    event_type TEXT NOT NULL,
    payload TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_team_task_events_task_id ON team_task_events(task_id);
"#;

const MIGRATION_0019_PERSISTENT_AGENTS: &str = r#"
CREATE TABLE IF NOT EXISTS persistent_agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    node_id TEXT REFERENCES nodes(id),
    profile_id TEXT,
    state TEXT NOT NULL DEFAULT 'stopped',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE TRIGGER IF NOT EXISTS trg_persistent_agents_updated_at
AFTER UPDATE ON persistent_agents
BEGIN
    UPDATE persistent_agents SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = NEW.id;
END;
"#;

const MIGRATION_0020_PERSISTENT_AGENT_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS persistent_agent_events (
    id TEXT PRIMARY KEY,
    persistent_agent_id TEXT NOT NULL REFERENCES persistent_agents(id),
    event_type TEXT NOT NULL,
    payload TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
CREATE INDEX IF NOT EXISTS idx_persistent_agent_events_agent_id
    ON persistent_agent_events(persistent_agent_id);
"#;
