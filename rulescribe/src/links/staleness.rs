//! Cooldown gate for link resolution.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::DEFAULT_LINK_COOLDOWN_DAYS;
use crate::record::{GameRecord, LinkField};

/// Why a resolution run goes ahead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RefreshReason {
    Forced,
    MissingLinks { fields: Vec<LinkField> },
    Stale { age_days: i64 },
}

/// Decides whether a record's links are due for a check.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    cooldown: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_LINK_COOLDOWN_DAYS)
    }
}

impl StalenessPolicy {
    pub fn from_days(days: i64) -> Self {
        Self {
            cooldown: Duration::days(days.max(0)),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// `None` means skip. A complete record without `updated_at` is fresh.
    pub fn check(&self, record: &GameRecord, force: bool, now: DateTime<Utc>) -> Option<RefreshReason> {
        if force {
            return Some(RefreshReason::Forced);
        }

        let missing = record.missing_links();
        if !missing.is_empty() {
            return Some(RefreshReason::MissingLinks { fields: missing });
        }

        let age = now - record.updated_at?;
        (age > self.cooldown).then(|| RefreshReason::Stale {
            age_days: age.num_days(),
        })
    }
}
