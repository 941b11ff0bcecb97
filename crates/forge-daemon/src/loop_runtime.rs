//! Loop Runtime: long-running per-(repository, profile) coroutines that
//! iteratively feed prompts to a harness, watch for completion, and stop
//! on caps or rules (`spec.md` §4.10).
//!
//! Each iteration: build a prompt (base + per-loop KV context + the
//! current work-state pointer) with [`compose::build_prompt`], spawn the
//! harness through an [`crate::exec::Executor`] per the profile's prompt
//! delivery mode, persist a `LoopRun` row, then evaluate the quantitative
//! and qualitative stop rules before sleeping until the next iteration.
//! Process-spawn-and-capture follows the conventions in
//! `plugins::worker_adapter::mock_backend`/`codex_tmux`.

pub mod compose;

use crate::exec::{ExecTarget, Executor};
use forge_core::db::loops::{self, Loop, LoopRepoError, LoopRunStatus, LoopState};
use forge_core::ids::{short_id, Clock};
use regex::Regex;
use rusqlite::Connection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the base prompt is delivered to the harness process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Written to an environment variable named by the profile.
    Env,
    /// Piped to the process's stdin.
    Stdin,
    /// Written to a temp file whose path is substituted into the command
    /// template.
    Path,
}

/// A harness + command template + prompt delivery mode (`spec.md` §3
/// "Account / Profile / Pool").
#[derive(Debug, Clone)]
pub struct Profile {
    pub id: String,
    pub harness: String,
    /// Command template. `{prompt_path}` is substituted for [`PromptMode::Path`].
    pub command_template: String,
    pub prompt_mode: PromptMode,
    /// Environment variable name used when `prompt_mode == Env`.
    pub env_var: String,
    pub extra_args: Vec<String>,
    pub auth_home: Option<std::path::PathBuf>,
}

/// `before`/`after`/`both` relative to the iteration the stop rule gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopWhen {
    Before,
    After,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Stop,
    Continue,
}

/// A quantitative stop rule: run a shell command every N iterations and
/// decide stop/continue by matching its exit code and/or output against a
/// regex.
#[derive(Debug, Clone)]
pub struct QuantStopRule {
    pub cmd: String,
    pub every: u32,
    pub exit_codes: Vec<i32>,
    /// Invert the exit-code match (stop when the code is *not* in `exit_codes`).
    pub invert: bool,
    pub stdout_regex: Option<String>,
    pub stderr_regex: Option<String>,
    pub when: StopWhen,
    pub timeout: Option<Duration>,
}

/// A qualitative stop rule: every M main iterations, run a judge
/// iteration whose first output token must be `0` (stop) or `1`
/// (continue).
#[derive(Debug, Clone)]
pub struct QualStopRule {
    pub every: u32,
    pub judge_prompt: String,
    pub on_invalid: StopDecision,
}

#[derive(Debug, Clone, Default)]
pub struct StopConfig {
    pub quant: Vec<QuantStopRule>,
    pub qual: Option<QualStopRule>,
}

#[derive(Debug, Error)]
pub enum LoopRuntimeError {
    #[error(transparent)]
    Repo(#[from] LoopRepoError),
    #[error("harness execution failed: {0}")]
    Exec(#[from] crate::exec::ExecError),
    #[error("loop {0} not found")]
    NotFound(String),
}

use thiserror::Error;

type Result<T> = std::result::Result<T, LoopRuntimeError>;

/// Outcome of a single iteration, used by tests and callers that want to
/// inspect what happened without re-reading the DB.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub iteration: i64,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stopped: bool,
    pub stop_reason: Option<String>,
}

/// Drives one loop to completion (or cancellation). Returns once the loop
/// transitions out of `running`, following §4.10's stop conditions:
/// `state == stopping` is represented here by a cancelled `cancel` token,
/// `max_iterations`/`max_runtime` are read from the `loops` row, and stop
/// rules are evaluated per iteration.
pub async fn run_loop(
    conn: &Connection,
    loop_id: &str,
    executor: Arc<dyn Executor>,
    profile: Profile,
    stop_config: StopConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> Result<Vec<IterationOutcome>> {
    let the_loop = loops::get(conn, loop_id)?.ok_or_else(|| LoopRuntimeError::NotFound(loop_id.to_string()))?;
    loops::mark_started(conn, loop_id, &clock.now().to_rfc3339())?;

    let start = Instant::now();
    let mut outcomes = Vec::new();
    let mut main_iteration: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            loops::set_state(conn, loop_id, LoopState::Stopped)?;
            break;
        }
        if the_loop.max_iterations > 0 && (main_iteration as i64) >= the_loop.max_iterations {
            info!("loop {} reached max_iterations={}", loop_id, the_loop.max_iterations);
            loops::set_state(conn, loop_id, LoopState::Stopped)?;
            break;
        }
        if the_loop.max_runtime_seconds > 0
            && start.elapsed() >= Duration::from_secs(the_loop.max_runtime_seconds as u64)
        {
            info!("loop {} reached max_runtime_seconds={}", loop_id, the_loop.max_runtime_seconds);
            loops::set_state(conn, loop_id, LoopState::Stopped)?;
            break;
        }

        // "before" quantitative rules.
        if let Some(reason) =
            evaluate_quant_rules(&executor, &stop_config.quant, StopWhen::Before, main_iteration, &cancel).await?
        {
            info!("loop {} stopped by before-rule: {reason}", loop_id);
            loops::set_state(conn, loop_id, LoopState::Stopped)?;
            outcomes.push(IterationOutcome {
                iteration: main_iteration as i64,
                exit_code: None,
                stdout_tail: String::new(),
                stopped: true,
                stop_reason: Some(reason),
            });
            break;
        }

        let iteration = loops::increment_iteration(conn, loop_id)?;
        let kv = loops::kv_all(conn, loop_id)?;
        let work_state = loops::current_work_state(conn, loop_id, "default")?;
        let prompt = compose::build_prompt(&the_loop.base_prompt, &kv, work_state.as_ref());

        let run_id = short_id();
        loops::start_run(conn, &run_id, loop_id, Some(&profile.id), &prompt)?;

        let output = spawn_harness(&executor, &profile, &prompt, &cancel).await;
        let (status, exit_code, stdout_tail) = match &output {
            Ok(out) => {
                let tail = tail_of(&out.stdout, 4096);
                let status = if out.exit_code == Some(0) {
                    LoopRunStatus::Succeeded
                } else {
                    LoopRunStatus::Failed
                };
                (status, out.exit_code, tail)
            }
            Err(e) => (LoopRunStatus::Failed, None, e.to_string()),
        };
        loops::finish_run(conn, &run_id, status, exit_code, &stdout_tail)?;

        main_iteration += 1;

        // "after" quantitative rules.
        if let Some(reason) =
            evaluate_quant_rules(&executor, &stop_config.quant, StopWhen::After, main_iteration, &cancel).await?
        {
            info!("loop {} stopped by after-rule: {reason}", loop_id);
            loops::set_state(conn, loop_id, LoopState::Stopped)?;
            outcomes.push(IterationOutcome {
                iteration,
                exit_code,
                stdout_tail: stdout_tail.clone(),
                stopped: true,
                stop_reason: Some(reason),
            });
            break;
        }

        // Qualitative (judge) rule.
        if let Some(qual) = &stop_config.qual {
            if qual.every > 0 && main_iteration % qual.every == 0 {
                match evaluate_qual_rule(&executor, &profile, qual, &cancel).await? {
                    StopDecision::Stop => {
                        info!("loop {} stopped by judge iteration", loop_id);
                        loops::set_state(conn, loop_id, LoopState::Stopped)?;
                        outcomes.push(IterationOutcome {
                            iteration,
                            exit_code,
                            stdout_tail: stdout_tail.clone(),
                            stopped: true,
                            stop_reason: Some("qualitative stop rule".to_string()),
                        });
                        break;
                    }
                    StopDecision::Continue => {}
                }
            }
        }

        outcomes.push(IterationOutcome {
            iteration,
            exit_code,
            stdout_tail,
            stopped: false,
            stop_reason: None,
        });

        if the_loop.interval_seconds > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {
                    loops::set_state(conn, loop_id, LoopState::Stopped)?;
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(the_loop.interval_seconds as u64)) => {}
            }
        }
    }

    Ok(outcomes)
}

async fn spawn_harness(
    executor: &Arc<dyn Executor>,
    profile: &Profile,
    prompt: &str,
    cancel: &CancellationToken,
) -> std::result::Result<crate::exec::ExecOutput, crate::exec::ExecError> {
    let target = ExecTarget::local();
    match profile.prompt_mode {
        PromptMode::Stdin => {
            executor
                .exec_interactive(&target, &profile.command_template, Some(prompt.as_bytes()), cancel)
                .await
        }
        PromptMode::Env => {
            // The command template is expected to read `$<env_var>`; we can't
            // set per-call env vars through the `Executor` trait (it shells
            // out via `sh -c`), so splice an inline export ahead of it.
            let escaped = prompt.replace('\'', "'\\''");
            let cmd = format!("{}='{}' {}", profile.env_var, escaped, profile.command_template);
            executor.exec(&target, &cmd, cancel).await
        }
        PromptMode::Path => {
            let tmp = std::env::temp_dir().join(format!("forge-loop-prompt-{}.txt", short_id()));
            if let Err(e) = std::fs::write(&tmp, prompt) {
                return Err(crate::exec::ExecError::Io(e));
            }
            let cmd = profile
                .command_template
                .replace("{prompt_path}", &tmp.display().to_string());
            let result = executor.exec(&target, &cmd, cancel).await;
            let _ = std::fs::remove_file(&tmp);
            result
        }
    }
}

async fn evaluate_quant_rules(
    executor: &Arc<dyn Executor>,
    rules: &[QuantStopRule],
    phase: StopWhen,
    main_iteration: u32,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    for rule in rules {
        if rule.when != phase && rule.when != StopWhen::Both {
            continue;
        }
        // `every == 0` is "no cadence restriction, run every time"; otherwise
        // the rule only actually runs its command every N main iterations
        // (spec.md §4.10 point 4).
        if rule.every > 0 && main_iteration % rule.every != 0 {
            continue;
        }
        let target = ExecTarget::local();
        let output = if let Some(timeout) = rule.timeout {
            match tokio::time::timeout(timeout, executor.exec(&target, &rule.cmd, cancel)).await {
                Ok(Ok(out)) => out,
                Ok(Err(_)) | Err(_) => continue, // exec failure/timeout: rule doesn't fire
            }
        } else {
            match executor.exec(&target, &rule.cmd, cancel).await {
                Ok(out) => out,
                Err(_) => continue,
            }
        };

        let exit_matches = if rule.exit_codes.is_empty() {
            true
        } else {
            output
                .exit_code
                .map(|code| rule.exit_codes.contains(&code))
                .unwrap_or(false)
        };
        let exit_matches = if rule.invert { !exit_matches } else { exit_matches };

        let stdout_matches = rule
            .stdout_regex
            .as_deref()
            .map(|pattern| regex_matches(pattern, &output.stdout))
            .unwrap_or(true);
        let stderr_matches = rule
            .stderr_regex
            .as_deref()
            .map(|pattern| regex_matches(pattern, &output.stderr))
            .unwrap_or(true);

        if exit_matches && stdout_matches && stderr_matches {
            return Ok(Some(format!("quant rule `{}` matched", rule.cmd)));
        }
    }
    Ok(None)
}

fn regex_matches(pattern: &str, bytes: &[u8]) -> bool {
    let Ok(re) = Regex::new(pattern) else {
        warn!("invalid stop-rule regex `{pattern}`, treating as non-match");
        return false;
    };
    re.is_match(&String::from_utf8_lossy(bytes))
}

async fn evaluate_qual_rule(
    executor: &Arc<dyn Executor>,
    profile: &Profile,
    rule: &QualStopRule,
    cancel: &CancellationToken,
) -> Result<StopDecision> {
    let output = spawn_harness(executor, profile, &rule.judge_prompt, cancel).await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_token = stdout.split_whitespace().next();
    Ok(match first_token {
        Some("0") => StopDecision::Stop,
        Some("1") => StopDecision::Continue,
        _ => rule.on_invalid,
    })
}

fn tail_of(bytes: &[u8], max: usize) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() <= max {
        s.into_owned()
    } else {
        s[s.len() - max..].to_string()
    }
}
