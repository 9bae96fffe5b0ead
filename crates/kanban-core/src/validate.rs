//! Stateless input checks shared by every command.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use regex::Regex;

use crate::config::{BoardConfig, ARCHIVED_STATUS};
use crate::error::{KanbanError, Result};

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s*([hdw])$").expect("regex"))
}

/// Parse a duration token such as `4h`, `2d` or `1w`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim().to_lowercase();
    let caps = duration_re().captures(&trimmed).ok_or_else(|| {
        KanbanError::invalid(format!(
            "invalid duration {value:?}; expected <number><h|d|w>, e.g. 4h or 2d"
        ))
    })?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| KanbanError::invalid(format!("duration {value:?} is too large")))?;
    let duration = match &caps[2] {
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => Duration::try_weeks(amount),
    };
    duration.ok_or_else(|| KanbanError::invalid(format!("duration {value:?} is too large")))
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|err| KanbanError::InvalidDate {
        value: value.to_string(),
        reason: format!("expected YYYY-MM-DD ({err})"),
    })
}

/// Accepts RFC3339 timestamps or bare dates (taken as midnight UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    Err(KanbanError::InvalidDate {
        value: value.to_string(),
        reason: "expected RFC3339 timestamp or YYYY-MM-DD".to_string(),
    })
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_task_id(value: &str) -> Result<u32> {
    let trimmed = value.trim().trim_start_matches('#');
    match trimmed.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(KanbanError::InvalidTaskId(value.to_string())),
    }
}

/// Parse a comma separated id list, keeping first-seen order.
pub fn parse_task_ids(value: &str) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for part in value.split(',') {
        if part.trim().is_empty() {
            continue;
        }
        let id = parse_task_id(part)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(KanbanError::InvalidTaskId(value.to_string()));
    }
    Ok(ids)
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Tags are whitespace-free tokens; duplicates collapse onto the first occurrence.
pub fn normalize_tags<I, S>(tags: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().any(char::is_whitespace) {
            return Err(KanbanError::invalid(format!(
                "tag {tag:?} must not contain whitespace"
            )));
        }
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    Ok(out)
}

pub fn require_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(KanbanError::invalid("title must not be empty"));
    }
    Ok(trimmed.to_string())
}

pub fn require_status(config: &BoardConfig, status: &str) -> Result<String> {
    let trimmed = status.trim();
    if config.has_status(trimmed) {
        return Ok(trimmed.to_string());
    }
    Err(KanbanError::InvalidStatus {
        status: status.to_string(),
        allowed: config.statuses.clone(),
    })
}

/// Like [`require_status`] but rejects the archive sink, which is only
/// reachable through `archive`/`delete`/`move`.
pub fn require_working_status(config: &BoardConfig, status: &str) -> Result<String> {
    let status = require_status(config, status)?;
    if status == ARCHIVED_STATUS {
        return Err(KanbanError::InvalidStatus {
            status,
            allowed: config.active_statuses().to_vec(),
        });
    }
    Ok(status)
}

pub fn require_priority(config: &BoardConfig, priority: &str) -> Result<String> {
    let trimmed = priority.trim();
    if config.has_priority(trimmed) {
        return Ok(trimmed.to_string());
    }
    Err(KanbanError::invalid(format!(
        "invalid priority {priority:?}; valid priorities: {}",
        config.priorities.join(", ")
    )))
}

pub fn require_class(config: &BoardConfig, class: &str) -> Result<String> {
    let trimmed = class.trim();
    if trimmed.is_empty() || config.class(trimmed).is_some() {
        return Ok(trimmed.to_string());
    }
    Err(KanbanError::invalid(format!(
        "invalid class {class:?}; valid classes: {}",
        config.class_names().join(", ")
    )))
}

pub fn require_estimate(value: &str) -> Result<String> {
    parse_duration(value)?;
    Ok(value.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_hours_days_weeks() {
        assert_eq!(parse_duration("4h").unwrap(), Duration::hours(4));
        assert_eq!(parse_duration("2d").unwrap(), Duration::days(2));
        assert_eq!(parse_duration("1W").unwrap(), Duration::weeks(1));
        assert!(parse_duration("30m").is_err());
        assert!(parse_duration("h").is_err());
        let err = parse_duration("9999999999999999h").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(parse_duration("999999999999999d").is_err());
        assert!(parse_duration("99999999999999999999w").is_err());
    }

    #[test]
    fn parse_timestamp_accepts_dates_and_rfc3339() {
        let ts = parse_timestamp("2026-03-01").unwrap();
        assert_eq!(format_timestamp(&ts), "2026-03-01T00:00:00Z");
        let ts = parse_timestamp("2026-03-01T10:30:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2026-03-01T08:30:00Z");
        assert_eq!(parse_timestamp("yesterday").unwrap_err().code(), "INVALID_DATE");
    }

    #[test]
    fn parse_task_ids_dedups_and_rejects_garbage() {
        assert_eq!(parse_task_ids("1,2, 2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_task_ids("1,x").unwrap_err().code(), "INVALID_TASK_ID");
        assert_eq!(parse_task_id("0").unwrap_err().code(), "INVALID_TASK_ID");
        assert_eq!(parse_task_id("#12").unwrap(), 12);
    }

    #[test]
    fn normalize_tags_preserves_first_occurrence_order() {
        let tags = normalize_tags(["ops", "api", "ops", " "]).unwrap();
        assert_eq!(tags, vec!["ops", "api"]);
        assert!(normalize_tags(["two words"]).is_err());
    }

    #[test]
    fn membership_checks_use_board_config() {
        let config = BoardConfig::default();
        assert_eq!(require_status(&config, "todo").unwrap(), "todo");
        assert_eq!(require_status(&config, "nope").unwrap_err().code(), "INVALID_STATUS");
        assert!(require_working_status(&config, "archived").is_err());
        assert!(require_priority(&config, "urgent").is_err());
        assert_eq!(require_class(&config, "").unwrap(), "");
        assert!(require_class(&config, "vip").is_err());
    }
}
