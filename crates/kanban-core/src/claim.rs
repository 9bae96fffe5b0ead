//! Advisory task claims with time-based expiry.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::{KanbanError, Result};
use crate::task::Task;
use crate::validate::format_timestamp;

/// Claim modifiers carried by a write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimRequest<'a> {
    pub agent: Option<&'a str>,
    pub release: bool,
    pub force: bool,
}

impl<'a> ClaimRequest<'a> {
    pub fn is_empty(&self) -> bool {
        self.agent.is_none() && !self.release
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEffect {
    None,
    Claimed(String),
    Refreshed(String),
    Released(String),
    ExpiredCleared(String),
}

pub fn is_active_claim(task: &Task, now: DateTime<Utc>, timeout: Duration) -> bool {
    match (&task.claimed_by, task.claimed_at) {
        (Some(_), Some(at)) => now.signed_duration_since(at) < timeout,
        _ => false,
    }
}

/// The agent holding an unexpired claim on `task`, if any.
pub fn active_holder<'t>(task: &'t Task, now: DateTime<Utc>, timeout: Duration) -> Option<&'t str> {
    if is_active_claim(task, now, timeout) {
        task.claimed_by.as_deref()
    } else {
        None
    }
}

/// Decide whether a write may touch `task`. Runs before any mutation.
pub fn authorize(
    task: &Task,
    request: &ClaimRequest<'_>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Result<()> {
    let Some(holder) = active_holder(task, now, timeout) else {
        return Ok(());
    };
    if request.force {
        return Ok(());
    }
    match request.agent {
        Some(agent) if agent == holder => Ok(()),
        Some(_) => Err(claimed_error(task)),
        None if request.release => Err(KanbanError::ClaimRequired(format!(
            "releasing the active claim on task #{}",
            task.id
        ))),
        None => Err(claimed_error(task)),
    }
}

fn claimed_error(task: &Task) -> KanbanError {
    KanbanError::TaskClaimed {
        id: task.id,
        claimed_by: task.claimed_by.clone().unwrap_or_default(),
        claimed_at: task
            .claimed_at
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_default(),
    }
}

/// Update claim fields after a successful, authorized mutation.
pub fn apply_claim(
    task: &mut Task,
    request: &ClaimRequest<'_>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> ClaimEffect {
    let active = is_active_claim(task, now, timeout);
    let previous = task.claimed_by.clone();
    if request.release {
        task.clear_claim();
        return match previous {
            Some(agent) if active => {
                info!(id = task.id, agent = %agent, "released claim");
                ClaimEffect::Released(agent)
            }
            Some(agent) => ClaimEffect::ExpiredCleared(agent),
            None => ClaimEffect::None,
        };
    }
    if let Some(agent) = request.agent {
        task.claimed_by = Some(agent.to_string());
        task.claimed_at = Some(now);
        if active && previous.as_deref() == Some(agent) {
            return ClaimEffect::Refreshed(agent.to_string());
        }
        info!(id = task.id, agent, "claimed task");
        return ClaimEffect::Claimed(agent.to_string());
    }
    if !active && (task.claimed_by.is_some() || task.claimed_at.is_some()) {
        task.clear_claim();
        return match previous {
            Some(agent) => ClaimEffect::ExpiredCleared(agent),
            None => ClaimEffect::None,
        };
    }
    ClaimEffect::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn claimed(agent: &str, age: Duration) -> Task {
        let mut task = Task::new(5, "Claimed", now());
        task.claimed_by = Some(agent.to_string());
        task.claimed_at = Some(now() - age);
        task
    }

    fn request(agent: Option<&str>, release: bool, force: bool) -> ClaimRequest<'_> {
        ClaimRequest {
            agent,
            release,
            force,
        }
    }

    #[test]
    fn expiry_is_strictly_less_than_timeout() {
        let hour = Duration::hours(1);
        assert!(is_active_claim(&claimed("a", Duration::minutes(59)), now(), hour));
        assert!(!is_active_claim(&claimed("a", hour), now(), hour));
        assert!(!is_active_claim(&Task::new(1, "free", now()), now(), hour));
    }

    #[test]
    fn authorization_table() {
        let hour = Duration::hours(1);
        let held = claimed("alice", Duration::minutes(10));
        let stale = claimed("alice", Duration::hours(2));

        assert!(authorize(&stale, &request(None, false, false), now(), hour).is_ok());
        let err = authorize(&held, &request(None, false, false), now(), hour).unwrap_err();
        assert_eq!(err.code(), "TASK_CLAIMED");
        let err = authorize(&held, &request(Some("bob"), false, false), now(), hour).unwrap_err();
        assert_eq!(err.code(), "TASK_CLAIMED");
        assert!(authorize(&held, &request(Some("alice"), false, false), now(), hour).is_ok());
        assert!(authorize(&held, &request(None, false, true), now(), hour).is_ok());
        let err = authorize(&held, &request(None, true, false), now(), hour).unwrap_err();
        assert_eq!(err.code(), "CLAIM_REQUIRED");
        assert!(authorize(&stale, &request(None, true, false), now(), hour).is_ok());
    }

    #[test]
    fn apply_claim_sets_refreshes_and_clears() {
        let hour = Duration::hours(1);
        let mut task = claimed("alice", Duration::minutes(10));
        let effect = apply_claim(&mut task, &request(Some("alice"), false, false), now(), hour);
        assert_eq!(effect, ClaimEffect::Refreshed("alice".to_string()));
        assert_eq!(task.claimed_at, Some(now()));

        let mut stale = claimed("alice", Duration::hours(2));
        let effect = apply_claim(&mut stale, &request(None, false, false), now(), hour);
        assert_eq!(effect, ClaimEffect::ExpiredCleared("alice".to_string()));
        assert_eq!(stale.claimed_by, None);

        let mut stale = claimed("alice", Duration::hours(2));
        let effect = apply_claim(&mut stale, &request(Some("bob"), false, false), now(), hour);
        assert_eq!(effect, ClaimEffect::Claimed("bob".to_string()));

        let mut forced = claimed("alice", Duration::minutes(1));
        let effect = apply_claim(&mut forced, &request(None, false, true), now(), hour);
        assert_eq!(effect, ClaimEffect::None);
        assert_eq!(forced.claimed_by.as_deref(), Some("alice"));

        let effect = apply_claim(&mut forced, &request(None, true, true), now(), hour);
        assert_eq!(effect, ClaimEffect::Released("alice".to_string()));
        assert_eq!(forced.claimed_at, None);
    }
}
