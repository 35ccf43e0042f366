use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Done,
}

/// One reminder as persisted in the task file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    /// Timezone-qualified instant, kept as the caller wrote it.
    pub remind_at: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: String,
}

impl Task {
    /// Both timestamps must parse as timezone-qualified instants.
    pub fn validate(&self) -> Result<(), StoreError> {
        parse_instant(&self.remind_at)?;
        parse_instant(&self.created_at)?;
        Ok(())
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub text: String,
    pub remind_at: String,
}

impl NewTask {
    pub fn new(text: impl Into<String>, remind_at: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            remind_at: remind_at.into(),
        }
    }

    /// Check the input and build the record to store.
    pub(crate) fn into_task(self) -> Result<Task, StoreError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(StoreError::Invalid("text must not be empty".to_string()));
        }
        let remind_at = self.remind_at.trim();
        parse_instant(remind_at)?;

        Ok(Task {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            remind_at: remind_at.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        })
    }
}

/// Parse an instant that carries a UTC offset. RFC 3339 is the norm; a
/// space instead of `T` and minute precision are tolerated. A value without
/// an offset is rejected.
pub fn parse_instant(value: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Ok(dt);
        }
    }
    if let Some(naive) = value.strip_suffix('Z') {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M") {
            return Ok(dt.and_utc().fixed_offset());
        }
    }
    Err(StoreError::Invalid(format!(
        "'{}' is not a timezone-qualified ISO-8601 timestamp",
        value
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instant_variants() {
        assert!(parse_instant("2026-03-01T09:30:00Z").is_ok());
        assert!(parse_instant("2026-03-01T09:30:00.123+03:00").is_ok());
        assert!(parse_instant("2026-03-01T09:30+03:00").is_ok());
        assert!(parse_instant("2026-03-01 09:30:00+00:00").is_ok());
        assert!(parse_instant("2026-03-01T09:30Z").is_ok());

        assert!(parse_instant("2026-03-01T09:30:00").is_err());
        assert!(parse_instant("tomorrow").is_err());
        assert!(parse_instant("").is_err());
    }

    #[test]
    fn test_new_task_trims_and_stamps() {
        let task = NewTask::new("  call mom  ", "2026-03-01T09:30:00Z")
            .into_task()
            .unwrap();
        assert_eq!(task.text, "call mom");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.id.len(), 36);
        assert!(task.validate().is_ok());
        assert!(task.created_at.ends_with("+00:00"));
    }

    #[test]
    fn test_blank_text_rejected() {
        assert!(matches!(
            NewTask::new("   ", "2026-03-01T09:30:00Z").into_task(),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(TaskStatus::Done.to_string(), "done");
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        let json = serde_json::to_string(&TaskStatus::Done).unwrap();
        assert_eq!(json, "\"done\"");
    }
}
