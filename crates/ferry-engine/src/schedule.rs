//! Cron scheduling for sync ticks
//!
//! The next due time is computed from the last synced timestamp, not from
//! the wall clock. When a tick is not yet due, the requeue delay is
//! `next(last_sync) - last_sync`; re-deliveries arriving early simply
//! compute the same answer again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;

use ferry_common::crd::MoveEngineStatus;
use ferry_common::{Error, Result};

/// Outcome of a schedule check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The schedule has elapsed; run a sync now
    Due,
    /// Not yet; reconcile again after the given delay
    NotDue(Duration),
}

/// Parse a standard 5-field cron expression
pub fn parse(expr: &str) -> Result<Cron> {
    Cron::new(expr)
        .parse()
        .map_err(|e| Error::validation(format!("invalid cron expression {:?}: {}", expr, e)))
}

/// Validate an expression without keeping the parse
pub fn validate(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// Next due time after the last sync
pub fn next_due(expr: &str, last_sync: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cron = parse(expr)?;
    cron.find_next_occurrence(&last_sync, false)
        .map_err(|e| Error::validation(format!("no next occurrence for {:?}: {}", expr, e)))
}

/// Decide whether a sync tick is due at `now`
pub fn check(expr: &str, last_sync: DateTime<Utc>, now: DateTime<Utc>) -> Result<Tick> {
    let due = next_due(expr, last_sync)?;
    if now > due {
        return Ok(Tick::Due);
    }
    let delay = (due - last_sync).to_std().unwrap_or(Duration::ZERO);
    Ok(Tick::NotDue(delay))
}

/// Last sync timestamp recorded on an engine status.
///
/// Prefers the current synced time, falls back to the previous one, and
/// defaults to the epoch so a never-synced engine is always due.
pub fn last_sync_time(status: &MoveEngineStatus) -> DateTime<Utc> {
    status
        .synced_time
        .as_deref()
        .or(status.last_synced_time.as_deref())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_rejects_bad_expressions() {
        assert!(validate("*/5 * * * *").is_ok());
        assert!(validate("not a cron").is_err());
        assert!(validate("99 * * * *").is_err());
    }

    #[test]
    fn test_requeue_delay_is_relative_to_last_sync() {
        // last sync at T, now at T+3m, every 5 minutes: not due, and the
        // delay is next(T) - T = 5 minutes, not next(T) - now.
        let last = t("2026-08-29T10:00:00Z");
        let now = t("2026-08-29T10:03:00Z");

        match check("*/5 * * * *", last, now).unwrap() {
            Tick::NotDue(delay) => assert_eq!(delay, Duration::from_secs(300)),
            other => panic!("expected NotDue, got {:?}", other),
        }
    }

    #[test]
    fn test_due_after_schedule_elapses() {
        let last = t("2026-08-29T10:00:00Z");
        let now = t("2026-08-29T10:06:00Z");
        assert_eq!(check("*/5 * * * *", last, now).unwrap(), Tick::Due);
    }

    #[test]
    fn test_never_synced_engine_is_due() {
        let status = MoveEngineStatus::default();
        let last = last_sync_time(&status);
        assert_eq!(last, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            check("*/5 * * * *", last, Utc.with_ymd_and_hms(2026, 8, 29, 10, 0, 0).unwrap())
                .unwrap(),
            Tick::Due
        );
    }

    #[test]
    fn test_prefers_synced_time_over_last_synced_time() {
        let status = MoveEngineStatus {
            synced_time: Some("2026-08-29T10:00:00Z".into()),
            last_synced_time: Some("2026-08-29T09:00:00Z".into()),
            ..Default::default()
        };
        assert_eq!(last_sync_time(&status), t("2026-08-29T10:00:00Z"));

        let fallback = MoveEngineStatus {
            last_synced_time: Some("2026-08-29T09:00:00Z".into()),
            ..Default::default()
        };
        assert_eq!(last_sync_time(&fallback), t("2026-08-29T09:00:00Z"));
    }
}
