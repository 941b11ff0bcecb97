//! Inbox file operations with atomic writes and conflict detection

use crate::io::{atomic::atomic_swap, error::InboxError, hash::compute_hash, lock::acquire_lock};
use crate::schema::InboxMessage;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Outcome of an inbox write operation
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Clean write with no conflicts detected
    Success,

    /// Concurrent write detected and merged automatically
    ConflictResolved { merged_messages: usize },

    /// Could not write immediately, message queued for later delivery
    Queued { spool_path: PathBuf },
}

/// Atomically append a message to an inbox with conflict detection
///
/// This implements the atomic write strategy with lock, hash, swap, and
/// conflict merge. If the lock cannot be acquired, the message is spooled
/// for later delivery.
///
/// # Arguments
///
/// * `inbox_path` - Full path to inbox.json file
/// * `message` - Message to append
/// * `team` - Target team name (for spooling)
/// * `agent` - Target agent name (for spooling)
///
/// # Returns
///
/// * `Success` - Message written cleanly
/// * `ConflictResolved` - Concurrent write detected and merged
/// * `Queued` - Lock timeout, message spooled for retry
///
/// # Errors
///
/// Returns `InboxError` for I/O errors, JSON parse errors, or merge failures.
pub fn inbox_append(
    inbox_path: &Path,
    message: &InboxMessage,
    team: &str,
    agent: &str,
) -> Result<WriteOutcome, InboxError> {
    let msg_clone = message.clone();
    match atomic_write_with_conflict_check(inbox_path, |messages| {
        // Deduplication check
        if let Some(ref msg_id) = msg_clone.message_id
            && messages
                .iter()
                .any(|m| m.message_id.as_ref() == Some(msg_id))
        {
            return false;
        }
        messages.push(msg_clone);
        true
    }) {
        Ok(outcome) => Ok(outcome),
        Err(InboxError::LockTimeout { .. }) => {
            // Could not acquire lock - spool for later delivery
            let spool_path = crate::io::spool::spool_message(team, agent, message)?;
            Ok(WriteOutcome::Queued { spool_path })
        }
        Err(e) => Err(e),
    }
}

/// Atomically update messages in an inbox using a closure
///
/// Acquires the inbox lock, reads current messages, applies the update
/// closure, and writes back atomically with conflict detection.
///
/// # Arguments
///
/// * `inbox_path` - Full path to inbox.json file
/// * `team` - Target team name (reserved for future use)
/// * `agent` - Target agent name (reserved for future use)
/// * `update_fn` - Closure that modifies the message vector in place
///
/// # Errors
///
/// Returns `InboxError` for I/O errors, JSON parse errors, lock timeout,
/// or merge failures.
pub fn inbox_update<F>(
    inbox_path: &Path,
    _team: &str,
    _agent: &str,
    update_fn: F,
) -> Result<(), InboxError>
where
    F: FnOnce(&mut Vec<InboxMessage>),
{
    atomic_write_with_conflict_check(inbox_path, |messages| {
        update_fn(messages);
        true
    })?;
    Ok(())
}

/// Shared atomic write logic for inbox operations
///
/// Acquires lock, reads current file, applies modification via closure,
/// writes atomically with conflict detection and merge.
///
/// The `modify_fn` closure receives the current messages and returns `true`
/// if modifications were made (triggering a write), or `false` to skip
/// the write (e.g., duplicate detection).
fn atomic_write_with_conflict_check<F>(
    inbox_path: &Path,
    modify_fn: F,
) -> Result<WriteOutcome, InboxError>
where
    F: FnOnce(&mut Vec<InboxMessage>) -> bool,
{
    let lock_path = inbox_path.with_extension("lock");
    let tmp_path = inbox_path.with_extension("tmp");

    // Step 1: Acquire lock with retry
    let _lock = acquire_lock(&lock_path, 5)?;

    // Step 2: Read current inbox and compute hash
    let (mut messages, original_hash) = if inbox_path.exists() {
        let content = fs::read(inbox_path).map_err(|e| InboxError::Io {
            path: inbox_path.to_path_buf(),
            source: e,
        })?;
        let hash = compute_hash(&content);
        let msgs: Vec<InboxMessage> =
            serde_json::from_slice(&content).map_err(|e| InboxError::Json {
                path: inbox_path.to_path_buf(),
                source: e,
            })?;
        (msgs, hash)
    } else {
        // New inbox file
        (Vec::new(), compute_hash(b"[]"))
    };

    // Step 3: Apply modification
    if !modify_fn(&mut messages) {
        // No changes needed (e.g., duplicate message)
        return Ok(WriteOutcome::Success);
    }

    // Step 4: Write to tmp file with fsync
    let new_content =
        serde_json::to_vec_pretty(&messages).map_err(|e| InboxError::Json {
            path: tmp_path.clone(),
            source: e,
        })?;

    {
        let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| InboxError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;

        tmp_file
            .write_all(&new_content)
            .map_err(|e| InboxError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;

        tmp_file.sync_all().map_err(|e| InboxError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
    }

    // Step 5: Atomic swap
    if !inbox_path.exists() {
        // First time creating inbox - just rename
        fs::rename(&tmp_path, inbox_path).map_err(|e| InboxError::Io {
            path: inbox_path.to_path_buf(),
            source: e,
        })?;
        return Ok(WriteOutcome::Success);
    }

    atomic_swap(inbox_path, &tmp_path)?;

    // Step 6: Check for concurrent writes
    let displaced_content = fs::read(&tmp_path).map_err(|e| InboxError::Io {
        path: tmp_path.clone(),
        source: e,
    })?;
    let displaced_hash = compute_hash(&displaced_content);

    let outcome = if displaced_hash != original_hash {
        // Step 7: Conflict detected - merge and re-swap
        let displaced_messages: Vec<InboxMessage> =
            serde_json::from_slice(&displaced_content).map_err(|e| InboxError::Json {
                path: tmp_path.clone(),
                source: e,
            })?;

        // Merge: add messages from displaced that aren't in our version
        let merged = merge_messages(&messages, &displaced_messages);
        let merge_count = merged.len() - messages.len();

        // Write merged version back
        let merged_content =
            serde_json::to_vec_pretty(&merged).map_err(|e| InboxError::Json {
                path: tmp_path.clone(),
                source: e,
            })?;

        fs::write(&tmp_path, &merged_content).map_err(|e| InboxError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;

        // Re-swap
        atomic_swap(inbox_path, &tmp_path)?;

        WriteOutcome::ConflictResolved {
            merged_messages: merge_count,
        }
    } else {
        WriteOutcome::Success
    };

    // Step 8: Lock released automatically on drop
    // Step 9: Delete tmp file
    let _ = fs::remove_file(&tmp_path); // Ignore errors on cleanup

    Ok(outcome)
}

/// Merge two message arrays, preserving order and deduplicating by message_id
fn merge_messages(
    our_messages: &[InboxMessage],
    their_messages: &[InboxMessage],
) -> Vec<InboxMessage> {
    let mut merged = our_messages.to_vec();
    let our_ids: std::collections::HashSet<_> = our_messages
        .iter()
        .filter_map(|m| m.message_id.as_ref())
        .collect();

    // Add messages from their version that we don't have
    for msg in their_messages {
        let already_present = if let Some(ref msg_id) = msg.message_id {
            our_ids.contains(msg_id)
        } else {
            // No message_id - check by content (less reliable)
            our_messages
                .iter()
                .any(|m| m.from == msg.from && m.text == msg.text && m.timestamp == msg.timestamp)
        };

        if !already_present {
            merged.push(msg.clone());
        }
    }

    // Sort by timestamp to maintain chronological order
    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    merged
}
