//! Reflog entries and retention.
//!
//! Every successful reference update appends one [`ReflogEntry`] to that
//! reference's log. Logs are local metadata: they are never reachable from
//! the object graph, and gaps left by pruning never affect ancestry queries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use grove_store::ObjectId;

/// Who and why, supplied by the caller of a reference update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefLogMessage {
    /// Actor identity (e.g. `"Ann <ann@example.com>"`).
    pub actor: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Free-text reason (e.g. `"commit: fix parser"`).
    pub reason: String,
}

impl RefLogMessage {
    /// Create a message with an explicit timestamp.
    #[must_use]
    pub fn new(actor: impl Into<String>, timestamp: i64, reason: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            timestamp,
            reason: reason.into(),
        }
    }

    /// Create a message stamped with the current wall-clock time.
    #[must_use]
    pub fn now(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(actor, unix_now(), reason)
    }
}

/// Current Unix time in seconds (0 if the clock is before the epoch).
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or_default()
}

/// One transition of a reference.
///
/// [`ObjectId::ZERO`] stands for "absent": `old` is zero on creation, `new`
/// is zero on deletion. For symbolic refs both ids are the commits the ref
/// resolved to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflogEntry {
    /// Resolved value before the update.
    pub old: ObjectId,
    /// Resolved value after the update.
    pub new: ObjectId,
    /// Who made the update.
    pub actor: String,
    /// When (seconds since the Unix epoch).
    pub timestamp: i64,
    /// Why.
    pub reason: String,
}

impl ReflogEntry {
    /// Build an entry from an update message.
    #[must_use]
    pub fn from_message(old: ObjectId, new: ObjectId, message: &RefLogMessage) -> Self {
        Self {
            old,
            new,
            actor: message.actor.clone(),
            timestamp: message.timestamp,
            reason: message.reason.clone(),
        }
    }
}

/// Which reflog entries to keep.
///
/// Both limits apply when set; an entry survives only if it satisfies both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many newest entries.
    pub max_entries: Option<usize>,
    /// Drop entries older than this many seconds.
    pub max_age_secs: Option<i64>,
}

impl RetentionPolicy {
    /// Keep everything.
    #[must_use]
    pub const fn keep_all() -> Self {
        Self {
            max_entries: None,
            max_age_secs: None,
        }
    }

    /// Apply the policy to entries ordered oldest first.
    ///
    /// Returns the surviving entries (still oldest first) and the number
    /// dropped.
    #[must_use]
    pub fn apply(&self, entries: Vec<ReflogEntry>, now: i64) -> (Vec<ReflogEntry>, usize) {
        let total = entries.len();
        let mut kept: Vec<ReflogEntry> = match self.max_age_secs {
            Some(age) => entries
                .into_iter()
                .filter(|e| now.saturating_sub(e.timestamp) <= age)
                .collect(),
            None => entries,
        };
        if let Some(max) = self.max_entries
            && kept.len() > max
        {
            kept.drain(..kept.len() - max);
        }
        let dropped = total - kept.len();
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64) -> ReflogEntry {
        ReflogEntry {
            old: ObjectId::ZERO,
            new: ObjectId::from_bytes([1; 32]),
            actor: "t".to_owned(),
            timestamp: ts,
            reason: format!("at {ts}"),
        }
    }

    #[test]
    fn keep_all_keeps_everything() {
        let (kept, dropped) = RetentionPolicy::keep_all().apply(vec![entry(1), entry(2)], 100);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn count_limit_keeps_newest() {
        let policy = RetentionPolicy {
            max_entries: Some(2),
            max_age_secs: None,
        };
        let (kept, dropped) = policy.apply(vec![entry(1), entry(2), entry(3)], 10);
        assert_eq!(dropped, 1);
        assert_eq!(kept.iter().map(|e| e.timestamp).collect::<Vec<_>>(), [2, 3]);
    }

    #[test]
    fn age_limit_drops_old() {
        let policy = RetentionPolicy {
            max_entries: None,
            max_age_secs: Some(50),
        };
        let (kept, dropped) = policy.apply(vec![entry(10), entry(60), entry(90)], 100);
        assert_eq!(dropped, 1);
        assert_eq!(kept[0].timestamp, 60);
    }

    #[test]
    fn both_limits_apply() {
        let policy = RetentionPolicy {
            max_entries: Some(1),
            max_age_secs: Some(50),
        };
        let (kept, dropped) = policy.apply(vec![entry(10), entry(60), entry(90)], 100);
        assert_eq!(dropped, 2);
        assert_eq!(kept[0].timestamp, 90);
    }

    #[test]
    fn entry_serializes_ids_as_hex() {
        let json = serde_json::to_string(&entry(5)).unwrap();
        assert!(json.contains(&"0".repeat(64)));
        let back: ReflogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry(5));
    }
}
