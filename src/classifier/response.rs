//! Parsing of completion output into typed candidates.
//!
//! The command is asked for bare JSON but often wraps it in prose or code
//! fences, so the first usable JSON block is located before parsing.

use chrono::{DateTime, Duration, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::dates::{parse_optional, parse_timestamp};
use crate::error::{AllocatorError, Result};

/// An event as proposed by the completion tool; fields are unchecked
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventCandidate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A deadline as proposed by the completion tool; fields are unchecked
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeadlineCandidate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// One entry of the bulk response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: i64,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub events: Vec<EventCandidate>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deadlines: Vec<DeadlineCandidate>,
}

impl BatchEntry {
    /// Company name with surrounding whitespace removed; blank counts as absent
    #[must_use]
    pub fn company_name(&self) -> Option<&str> {
        self.company_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Parsed bulk response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    pub entries: Vec<BatchEntry>,
    /// Array elements that were not valid entries
    pub rejected: usize,
}

/// Single-message response before validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub events: Vec<EventCandidate>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deadlines: Vec<DeadlineCandidate>,
}

/// An event candidate that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEvent {
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: String,
    pub description: String,
}

/// A deadline candidate that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDeadline {
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub content: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(ToString::to_string)
}

impl EventCandidate {
    /// Validate the candidate.
    ///
    /// Requires a non-blank title and a parseable start. A missing, invalid
    /// or inverted end becomes start + `default_length`.
    #[must_use]
    pub fn resolve(&self, default_length: Duration) -> Option<ResolvedEvent> {
        let title = non_blank(self.title.as_deref())?;
        let start_at = parse_timestamp(self.start_at.as_deref()?)?;
        let end_at = parse_optional(self.end_at.as_deref())
            .filter(|end| *end >= start_at)
            .unwrap_or(start_at + default_length);

        Some(ResolvedEvent {
            title,
            start_at,
            end_at,
            location: non_blank(self.location.as_deref()).unwrap_or_default(),
            description: non_blank(self.description.as_deref()).unwrap_or_default(),
        })
    }
}

impl DeadlineCandidate {
    /// Validate the candidate; requires a non-blank title and a parseable deadline
    #[must_use]
    pub fn resolve(&self) -> Option<ResolvedDeadline> {
        Some(ResolvedDeadline {
            title: non_blank(self.title.as_deref())?,
            deadline: parse_timestamp(self.deadline.as_deref()?)?,
            content: non_blank(self.content.as_deref()),
        })
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| de::Error::custom(format!("invalid id: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid id: {s}"))),
        other => Err(de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// End index (exclusive) of the bracket block opening at `start`, skipping
/// brackets inside JSON strings.
fn balanced_end(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate the first block delimited by `open`/`close` that `accept` approves.
///
/// Tries each balanced block in order of its opening bracket, then the span
/// from the first `open` to the last `close`, then the whole text.
fn find_json_block<'a>(text: &'a str, open: char, close: char, accept: impl Fn(&str) -> bool) -> Option<&'a str> {
    let (open_b, close_b) = (open as u8, close as u8);

    for (start, _) in text.match_indices(open) {
        if let Some(end) = balanced_end(text, start, open_b, close_b) {
            let candidate = &text[start..end];
            if accept(candidate) {
                return Some(candidate);
            }
        }
    }

    if let (Some(first), Some(last)) = (text.find(open), text.rfind(close)) {
        if first < last {
            let candidate = &text[first..=last];
            if accept(candidate) {
                return Some(candidate);
            }
        }
    }

    let trimmed = text.trim();
    accept(trimmed).then_some(trimmed)
}

/// Find the first JSON array in `text`
#[must_use]
pub fn extract_json_array(text: &str) -> Option<&str> {
    find_json_block(text, '[', ']', |s| serde_json::from_str::<Vec<Value>>(s).is_ok())
}

/// Find the first JSON object in `text`
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    find_json_block(text, '{', '}', |s| {
        serde_json::from_str::<Value>(s).is_ok_and(|v| v.is_object())
    })
}

/// Parse the bulk response. Array elements that are not valid entries are
/// counted and skipped; a response without any JSON array is an error.
pub fn parse_batch_response(text: &str) -> Result<BatchResponse> {
    let block = extract_json_array(text).ok_or_else(|| {
        AllocatorError::ExternalInvocation("completion output contained no JSON array".into())
    })?;
    let items: Vec<Value> = serde_json::from_str(block)?;

    let mut response = BatchResponse::default();
    for item in items {
        match serde_json::from_value::<BatchEntry>(item) {
            Ok(entry) => response.entries.push(entry),
            Err(e) => {
                warn!(error = %e, "Skipping malformed classifier entry");
                response.rejected += 1;
            }
        }
    }
    Ok(response)
}

/// Parse the single-message response
pub fn parse_schedule_response(text: &str) -> Result<ScheduleResponse> {
    let block = extract_json_object(text).ok_or_else(|| {
        AllocatorError::ExternalInvocation("completion output contained no JSON object".into())
    })?;
    Ok(serde_json::from_str(block)?)
}
