//! Trigger descriptors — the JSON files dropped into the events directory.
//!
//! One file holds one descriptor. The filename is the descriptor's identity;
//! the content says who to wake, with what text, and when.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::TriggerError;

/// When a descriptor should fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Fire as soon as the file is observed.
    Immediate,
    /// Fire once at `fire_at`. `at` keeps the timestamp as written.
    OneShot { at: String, fire_at: DateTime<Utc> },
    /// Fire on every cron match in `timezone` until the file is removed.
    Periodic { schedule: String, timezone: String },
}

impl Trigger {
    /// The `type` tag used in descriptor files and event payloads.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Trigger::Immediate => "immediate",
            Trigger::OneShot { .. } => "one-shot",
            Trigger::Periodic { .. } => "periodic",
        }
    }

    /// Schedule marker embedded in the event payload.
    pub fn schedule_info(&self) -> &str {
        match self {
            Trigger::Immediate => "immediate",
            Trigger::OneShot { at, .. } => at,
            Trigger::Periodic { schedule, .. } => schedule,
        }
    }

    /// Periodic descriptors survive firing; the others are single-use.
    pub fn is_periodic(&self) -> bool {
        matches!(self, Trigger::Periodic { .. })
    }
}

/// A parsed descriptor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub conversation_id: String,
    pub text: String,
    pub trigger: Trigger,
}

/// On-disk shape. Everything optional so missing fields get a precise error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    #[serde(rename = "type")]
    kind: Option<String>,
    conversation_id: Option<Value>,
    text: Option<String>,
    at: Option<String>,
    schedule: Option<String>,
    timezone: Option<String>,
}

impl Descriptor {
    /// Parse descriptor `content` read from `file`.
    pub fn parse(file: &str, content: &str) -> Result<Self, TriggerError> {
        let raw: RawDescriptor =
            serde_json::from_str(content).map_err(|e| TriggerError::Malformed {
                file: file.to_string(),
                reason: e.to_string(),
            })?;

        let missing = |field: &'static str| TriggerError::MissingField {
            file: file.to_string(),
            field,
        };

        let kind = raw.kind.ok_or_else(|| missing("type"))?;
        // Chat ids are often numeric; accept either form.
        let conversation_id = match raw.conversation_id {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(missing("conversationId")),
        };
        let text = raw.text.ok_or_else(|| missing("text"))?;

        let trigger = match kind.as_str() {
            "immediate" => Trigger::Immediate,
            "one-shot" => {
                let at = raw.at.ok_or_else(|| missing("at"))?;
                let fire_at = DateTime::parse_from_rfc3339(&at)
                    .map_err(|e| TriggerError::InvalidTimestamp {
                        file: file.to_string(),
                        value: at.clone(),
                        reason: e.to_string(),
                    })?
                    .with_timezone(&Utc);
                Trigger::OneShot { at, fire_at }
            }
            "periodic" => Trigger::Periodic {
                schedule: raw.schedule.ok_or_else(|| missing("schedule"))?,
                timezone: raw.timezone.ok_or_else(|| missing("timezone"))?,
            },
            other => {
                return Err(TriggerError::UnknownType {
                    file: file.to_string(),
                    kind: other.to_string(),
                });
            }
        };

        Ok(Self {
            conversation_id,
            text,
            trigger,
        })
    }

    /// Text handed to the event target when this descriptor fires.
    pub fn payload(&self, file: &str) -> String {
        format!(
            "[EVENT:{}:{}:{}] {}",
            file,
            self.trigger.type_tag(),
            self.trigger.schedule_info(),
            self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_immediate() {
        let d = Descriptor::parse(
            "hello.json",
            r#"{"type":"immediate","conversationId":"42","text":"hi"}"#,
        )
        .unwrap();
        assert_eq!(d.conversation_id, "42");
        assert_eq!(d.trigger, Trigger::Immediate);
        assert_eq!(d.payload("hello.json"), "[EVENT:hello.json:immediate:immediate] hi");
    }

    #[test]
    fn parse_one_shot_keeps_raw_timestamp() {
        let d = Descriptor::parse(
            "ping.json",
            r#"{"type":"one-shot","conversationId":"7","text":"ping","at":"2030-01-02T03:04:05+02:00"}"#,
        )
        .unwrap();
        match &d.trigger {
            Trigger::OneShot { at, fire_at } => {
                assert_eq!(at, "2030-01-02T03:04:05+02:00");
                assert_eq!(fire_at.to_rfc3339(), "2030-01-02T01:04:05+00:00");
            }
            other => panic!("expected one-shot, got {other:?}"),
        }
        assert_eq!(
            d.payload("ping.json"),
            "[EVENT:ping.json:one-shot:2030-01-02T03:04:05+02:00] ping"
        );
    }

    #[test]
    fn parse_periodic() {
        let d = Descriptor::parse(
            "daily.json",
            r#"{"type":"periodic","conversationId":"7","text":"check","schedule":"0 9 * * *","timezone":"UTC"}"#,
        )
        .unwrap();
        assert!(d.trigger.is_periodic());
        assert_eq!(d.payload("daily.json"), "[EVENT:daily.json:periodic:0 9 * * *] check");
    }

    #[test]
    fn numeric_conversation_id() {
        let d = Descriptor::parse(
            "n.json",
            r#"{"type":"immediate","conversationId":-100123,"text":"x"}"#,
        )
        .unwrap();
        assert_eq!(d.conversation_id, "-100123");
    }

    #[test]
    fn missing_fields_are_reported() {
        let err = Descriptor::parse("a.json", r#"{"type":"immediate","text":"x"}"#).unwrap_err();
        assert!(matches!(err, TriggerError::MissingField { field: "conversationId", .. }));

        let err = Descriptor::parse("b.json", r#"{"type":"one-shot","conversationId":"1","text":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, TriggerError::MissingField { field: "at", .. }));

        let err = Descriptor::parse(
            "c.json",
            r#"{"type":"periodic","conversationId":"1","text":"x","schedule":"* * * * *"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TriggerError::MissingField { field: "timezone", .. }));
    }

    #[test]
    fn rejects_truncated_json_and_unknown_type() {
        let err = Descriptor::parse("t.json", r#"{"type":"immedi"#).unwrap_err();
        assert!(matches!(err, TriggerError::Malformed { .. }));

        let err = Descriptor::parse("u.json", r#"{"type":"weekly","conversationId":"1","text":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, TriggerError::UnknownType { .. }));
    }

    #[test]
    fn rejects_timestamp_without_offset() {
        let err = Descriptor::parse(
            "v.json",
            r#"{"type":"one-shot","conversationId":"1","text":"x","at":"2030-01-01 10:00"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TriggerError::InvalidTimestamp { .. }));
    }
}
