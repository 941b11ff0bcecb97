//! Identifier and clock service.
//!
//! Produces sortable message identifiers of the form `YYYYMMDD-HHMMSS-NNNN`,
//! where `NNNN` is a per-process sequence counter that resets at every
//! second boundary. String comparison of two ids produced by the same
//! generator is equivalent to chronological order; ids from different
//! generators racing the same wall-clock second are ordered by whichever
//! sequence counter happened to be higher, which is good enough for the
//! "monotonic within a process" guarantee this type promises (see
//! `spec.md` §4.1 and §5).

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use uuid::Uuid;

/// Injectable source of the current time, so callers can pin a clock in
/// tests instead of depending on `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Default clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double that returns a fixed, externally advanceable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Replace the clock's current instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("FixedClock mutex poisoned") = now;
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().expect("FixedClock mutex poisoned");
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("FixedClock mutex poisoned")
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        T::now(self)
    }
}

/// Generates sortable message ids `YYYYMMDD-HHMMSS-NNNN`.
///
/// `NNNN` is a 4-digit, zero-padded sequence number that wraps modulo
/// 10,000 and resets to zero whenever the wall-clock second (as reported
/// by the configured [`Clock`]) advances past the second the generator
/// last saw.
pub struct MessageIdGenerator {
    clock: Box<dyn Clock>,
    last_second: AtomicI64,
    sequence: AtomicU32,
}

impl MessageIdGenerator {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            last_second: AtomicI64::new(i64::MIN),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn system() -> Self {
        Self::new(SystemClock)
    }

    /// Generate the next id. Safe to call concurrently from multiple
    /// threads in the same process; the sequence counter is a CAS loop so
    /// no two calls ever observe the same (second, sequence) pair.
    pub fn next_id(&self) -> String {
        let now = self.clock.now();
        let epoch_second = now.timestamp();

        let seq = loop {
            let prev_second = self.last_second.load(Ordering::Acquire);
            if epoch_second != prev_second {
                // Try to claim the rollover to sequence 0 for this new second.
                if self
                    .last_second
                    .compare_exchange(
                        prev_second,
                        epoch_second,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.sequence.store(1, Ordering::Release);
                    break 0;
                }
                // Lost the race; fall through and take a sequence number
                // in whichever second is now current.
                continue;
            }
            let seq = self.sequence.fetch_add(1, Ordering::AcqRel) % 10_000;
            break seq;
        };

        format!("{}-{:04}", now.format("%Y%m%d-%H%M%S"), seq)
    }
}

/// First 8 hex characters of a fresh UUIDv4 — used for loop/daemon short
/// identifiers that don't need the full sortable id format.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Derive an agent-safe slug from an arbitrary display name: lowercase,
/// non-`[a-z0-9-]` runs collapsed to a single `-`, leading/trailing `-`
/// trimmed. Used to turn e.g. a harness-reported session title or repo
/// directory name into something `mail::types::validate_name` will accept
/// as a topic or agent name. An input with no retainable characters falls
/// back to `"agent"` rather than producing an empty (invalid) slug.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.chars() {
        let lower = c.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            out.push(lower);
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "agent".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_are_monotonic_within_a_second() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let gen = MessageIdGenerator::new(clock);
        let a = gen.next_id();
        let b = gen.next_id();
        let c = gen.next_id();
        assert!(a < b, "{a} should sort before {b}");
        assert!(b < c, "{b} should sort before {c}");
        assert_eq!(a, "20260301-120000-0000");
        assert_eq!(b, "20260301-120000-0001");
    }

    #[test]
    fn sequence_resets_on_second_rollover() {
        let clock = std::sync::Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let gen = MessageIdGenerator::new(clock.clone());
        let a = gen.next_id();
        clock.advance(chrono::Duration::seconds(1));
        let b = gen.next_id();
        assert_eq!(a, "20260301-120000-0000");
        assert_eq!(b, "20260301-120001-0000");
        assert!(a < b);
    }

    #[test]
    fn format_matches_spec_pattern() {
        let gen = MessageIdGenerator::system();
        let id = gen.next_id();
        let re = regex_like_check(&id);
        assert!(re, "id {id} does not match YYYYMMDD-HHMMSS-NNNN");
    }

    fn regex_like_check(id: &str) -> bool {
        let bytes = id.as_bytes();
        if bytes.len() != 20 {
            return false;
        }
        let digits = |r: std::ops::Range<usize>| bytes[r].iter().all(|b| b.is_ascii_digit());
        digits(0..8) && bytes[8] == b'-' && digits(9..15) && bytes[15] == b'-' && digits(16..20)
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn slugify_lowercases_and_collapses_separators() {
        assert_eq!(slugify("Claude Code Agent"), "claude-code-agent");
        assert_eq!(slugify("my_repo--name"), "my-repo-name");
        assert_eq!(slugify("  leading/trailing  "), "leading-trailing");
    }

    #[test]
    fn slugify_falls_back_on_empty_input() {
        assert_eq!(slugify(""), "agent");
        assert_eq!(slugify("@#$%"), "agent");
    }

    #[test]
    fn slugify_output_passes_mail_name_validation() {
        let slug = slugify("Arch CTM (Review)");
        assert!(crate::mail::validate_name(&slug).is_ok());
    }
}
