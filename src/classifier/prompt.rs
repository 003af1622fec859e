//! Prompt text handed to the completion command.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::EmailMessage;

/// One message as embedded in the bulk prompt
#[derive(Debug, Serialize)]
struct PromptEmail<'a> {
    id: i64,
    from: &'a str,
    from_name: Option<&'a str>,
    subject: Option<&'a str>,
    body: &'a str,
}

/// Longest prefix of `text` with at most `max_chars` characters
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(byte_index, _)| &text[..byte_index])
}

const ROLE: &str = "You are a scheduling assistant for a student's job search.";

const EVENT_RULES: &str = "\
- events: things the user must attend at a specific time (interviews, company briefings, \
round-table talks, seminars). start_at is required.
- deadlines: things the user must finish or submit by a specific time (entry sheets, \
web tests). deadline is required.";

fn date_rules(today: NaiveDate) -> String {
    format!(
        "- Write every date-time as ISO 8601 (YYYY-MM-DDTHH:mm:ss).\n\
         - When a year is missing, pick the nearest future date relative to today ({today}).\n\
         - Reply with JSON only, in exactly the format below. No Markdown, no explanations."
    )
}

const EVENT_SHAPE: &str = r#"{
        "title": "event name",
        "start_at": "ISO 8601",
        "end_at": "ISO 8601 (optional)",
        "location": "place (optional)",
        "description": "details (optional)"
      }"#;

const DEADLINE_SHAPE: &str = r#"{
        "title": "deadline name",
        "deadline": "ISO 8601",
        "content": "details (optional)"
      }"#;

/// Prompt covering a whole batch; the reply is one array entry per message.
pub fn build_bulk_prompt(messages: &[EmailMessage], body_chars: usize, today: NaiveDate) -> Result<String> {
    let emails: Vec<PromptEmail<'_>> = messages
        .iter()
        .map(|m| PromptEmail {
            id: m.id,
            from: &m.from_address,
            from_name: m.from_name.as_deref(),
            subject: m.subject.as_deref(),
            body: truncate_chars(m.body(), body_chars),
        })
        .collect();
    let emails_json = serde_json::to_string(&emails)?;

    Ok(format!(
        "{ROLE}
Process the list of e-mails below (JSON). For each e-mail extract the company name, events and deadlines.

# Input
{emails_json}

# Rules
- company_name: identify the company from the sender name, address, subject and body, \
in that order of preference (sender name, signature, subject, body). For mail from job \
boards, use the company the mail is about. Promotional mail unrelated to a selection \
process gets null. Use null when the company cannot be identified.
{EVENT_RULES}

# Notes
{date_rules}

# Output format (JSON array)
[
  {{
    \"id\": <id of the input e-mail (number)>,
    \"company_name\": \"company name\",
    \"events\": [
      {EVENT_SHAPE}
    ],
    \"deadlines\": [
      {DEADLINE_SHAPE}
    ]
  }}
]",
        date_rules = date_rules(today),
    ))
}

/// Prompt for a single message; the reply is one object with events and deadlines.
#[must_use]
pub fn build_single_prompt(message: &EmailMessage, body_chars: usize, today: NaiveDate) -> String {
    let body = truncate_chars(message.body(), body_chars);
    format!(
        "{ROLE}
Process the e-mail below and extract events and deadlines.

# Input
Subject: {subject}
{body}

# Rules
{EVENT_RULES}

# Notes
{date_rules}

# Output format (JSON)
{{
  \"events\": [
      {EVENT_SHAPE}
  ],
  \"deadlines\": [
      {DEADLINE_SHAPE}
  ]
}}",
        subject = message.subject_text(),
        date_rules = date_rules(today),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("説明会のご案内", 3), "説明会");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 5), "");
    }
}
