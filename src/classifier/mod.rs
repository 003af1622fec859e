//! Bulk classifier: hands unprocessed messages to an external completion
//! command and applies the structured reply.
//!
//! One prompt covers every unprocessed message of a user. If the command or
//! the reply parsing fails nothing is written and the whole batch stays
//! unprocessed. Otherwise each covered message is resolved to a company,
//! its events and deadlines are stored, and it ends up `processed` or, when
//! applying its entry failed, `error`. Messages the reply does not mention
//! stay unprocessed for the next run.

pub mod prompt;
pub mod response;
pub mod runner;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ClassifierConfig, ScheduleConfig};
use crate::db::Database;
use crate::error::{AllocatorError, Result};
use crate::logging::OperationTimer;
use crate::matcher::fold_keyword;
use crate::metrics::{BatchOutcome, MetricsCollector};
use crate::models::{
    AiStatus, AllocationMethod, Company, EmailMessage, EventType, NewEsEntry, NewEvent, ES_STATUS_NOT_STARTED,
};
use crate::repository::{CalendarEventRequest, CalendarMirror, ScheduleRepository};

use self::prompt::{build_bulk_prompt, build_single_prompt};
use self::response::{parse_batch_response, parse_schedule_response, BatchEntry, ResolvedDeadline, ResolvedEvent};
use self::runner::CompletionRunner;

/// Category of a progress log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Error,
    /// The prompt sent to the command
    Prompt,
    /// The raw command output
    Response,
}

/// One progress line emitted while classifying
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub message: String,
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Receiver for classifier progress. Any `Fn(LogEntry)` closure qualifies.
pub trait ClassifierLog: Send + Sync {
    fn log(&self, entry: LogEntry);
}

impl<F> ClassifierLog for F
where
    F: Fn(LogEntry) + Send + Sync,
{
    fn log(&self, entry: LogEntry) {
        self(entry);
    }
}

/// Forwards progress lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl ClassifierLog for TracingLog {
    fn log(&self, entry: LogEntry) {
        match entry.kind {
            LogKind::Info => info!(data = ?entry.data, "{}", entry.message),
            LogKind::Error => error!(data = ?entry.data, "{}", entry.message),
            LogKind::Prompt | LogKind::Response => {
                debug!(kind = ?entry.kind, data = ?entry.data, "{}", entry.message);
            }
        }
    }
}

/// Totals of one bulk run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Messages marked processed
    pub processed: usize,
    pub events_created: usize,
    pub es_entries_created: usize,
    /// Messages marked as errored, or the whole batch when the call failed
    pub errors: usize,
}

/// Events and deadlines found in a single message; nothing is stored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedSchedule {
    pub events: Vec<ResolvedEvent>,
    pub deadlines: Vec<ResolvedDeadline>,
}

/// Guess the event category from its title
#[must_use]
pub fn infer_event_type(title: &str) -> EventType {
    const BRIEFING: [&str; 5] = ["説明会", "セミナー", "座談会", "seminar", "briefing"];
    const INTERVIEW: [&str; 3] = ["面接", "選考", "interview"];
    const TEST: [&str; 4] = ["テスト", "試験", "test", "exam"];

    let folded = fold_keyword(title);
    let has_any = |words: &[&str]| words.iter().any(|w| folded.contains(w));

    if has_any(&BRIEFING) {
        EventType::Briefing
    } else if has_any(&INTERVIEW) {
        EventType::Interview
    } else if has_any(&TEST) {
        EventType::Test
    } else {
        EventType::Other
    }
}

/// First company, in the given order, whose name contains `name` after folding
fn find_company_by_name<'a>(companies: &'a [Company], name: &str) -> Option<&'a Company> {
    let needle = fold_keyword(name.trim());
    if needle.is_empty() {
        return None;
    }
    companies.iter().find(|c| fold_keyword(&c.name).contains(&needle))
}

/// Per-message counters, kept even when applying an entry fails part way
#[derive(Debug, Default)]
struct EntryTally {
    events: usize,
    es_entries: usize,
}

/// Batch classification over a user's unprocessed messages
pub struct BulkClassifier {
    db: Database,
    runner: Arc<dyn CompletionRunner>,
    schedule: Arc<dyn ScheduleRepository>,
    mirror: Option<Arc<dyn CalendarMirror>>,
    log: Arc<dyn ClassifierLog>,
    metrics: MetricsCollector,
    config: ClassifierConfig,
    schedule_defaults: ScheduleConfig,
}

impl std::fmt::Debug for BulkClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkClassifier")
            .field("db", &self.db)
            .field("mirror", &self.mirror.is_some())
            .field("config", &self.config)
            .field("schedule_defaults", &self.schedule_defaults)
            .finish_non_exhaustive()
    }
}

impl BulkClassifier {
    /// Classifier that stores events in `db`, logs through `tracing` and has no calendar mirror
    pub fn new(db: Database, runner: Arc<dyn CompletionRunner>) -> Self {
        let defaults = AppConfig::default();
        Self {
            schedule: Arc::new(db.clone()),
            db,
            runner,
            mirror: None,
            log: Arc::new(TracingLog),
            metrics: MetricsCollector::default(),
            config: defaults.classifier,
            schedule_defaults: defaults.schedule,
        }
    }

    #[must_use]
    pub fn with_schedule_repository(mut self, schedule: Arc<dyn ScheduleRepository>) -> Self {
        self.schedule = schedule;
        self
    }

    #[must_use]
    pub fn with_calendar_mirror(mut self, mirror: Arc<dyn CalendarMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn ClassifierLog>) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ClassifierConfig, schedule_defaults: ScheduleConfig) -> Self {
        self.config = config;
        self.schedule_defaults = schedule_defaults;
        self
    }

    fn emit(&self, entry: LogEntry) {
        self.log.log(entry);
    }

    fn default_event_length(&self) -> Duration {
        Duration::minutes(self.schedule_defaults.default_event_minutes)
    }

    /// Time one command invocation and record its latency
    async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let output = self.runner.complete(prompt).await;
        self.metrics.record_completion(started.elapsed(), output.is_ok());
        output
    }

    /// Classify every unprocessed message of `user_id` in one command call.
    ///
    /// Returns a zero result without calling the command when there is
    /// nothing to do. A failed call or an unreadable reply is reported as
    /// every submitted message being an error, with no flag changed.
    pub async fn process_unprocessed(&self, user_id: i64) -> Result<BatchResult> {
        let timer = OperationTimer::new("process_unprocessed");

        let messages = self
            .db
            .run_blocking(move |db| db.list_unprocessed_messages(user_id))
            .await?;
        if messages.is_empty() {
            self.emit(LogEntry::new(LogKind::Info, "No unprocessed messages"));
            self.metrics.record_batch(BatchOutcome::Empty, timer.finish());
            return Ok(BatchResult::default());
        }

        let companies = self.db.run_blocking(move |db| db.list_companies(user_id)).await?;
        self.emit(
            LogEntry::new(LogKind::Info, format!("Classifying {} messages", messages.len()))
                .with_data(json!({ "user_id": user_id, "count": messages.len() })),
        );

        let body_chars = usize::try_from(self.config.body_excerpt_chars).unwrap_or(usize::MAX);
        let prompt = build_bulk_prompt(&messages, body_chars, Local::now().date_naive())?;
        self.emit(LogEntry::new(LogKind::Prompt, "Prompt built").with_data(json!({ "length": prompt.len() })));

        let parsed = match self.complete(&prompt).await {
            Ok(output) => {
                self.emit(LogEntry::new(LogKind::Response, "Response received").with_data(json!({ "output": output })));
                parse_batch_response(&output)
            }
            Err(e) => Err(e),
        };
        let response = match parsed {
            Ok(response) => response,
            Err(e) => {
                self.emit(LogEntry::new(LogKind::Error, format!("Batch aborted: {e}")));
                self.metrics.record_error(e.kind().as_str(), "classify");
                self.metrics.record_batch(BatchOutcome::Failed, timer.finish());
                return Ok(BatchResult {
                    errors: messages.len(),
                    ..BatchResult::default()
                });
            }
        };
        if response.rejected > 0 {
            self.emit(LogEntry::new(
                LogKind::Error,
                format!("Ignored {} malformed entries", response.rejected),
            ));
        }

        let submitted: HashMap<i64, &EmailMessage> = messages.iter().map(|m| (m.id, m)).collect();
        let mut applied = HashSet::new();
        let mut result = BatchResult::default();

        for entry in &response.entries {
            let Some(message) = submitted.get(&entry.id) else {
                warn!(id = entry.id, "Classifier returned an id that was not submitted");
                continue;
            };
            if !applied.insert(entry.id) {
                warn!(id = entry.id, "Duplicate classifier entry ignored");
                continue;
            }

            let mut tally = EntryTally::default();
            let status = match self.apply_entry(user_id, message, entry, &companies, &mut tally).await {
                Ok(()) => AiStatus::Processed,
                Err(e) => {
                    self.emit(
                        LogEntry::new(LogKind::Error, format!("Failed to apply entry for message {}: {e}", message.id))
                            .with_data(json!({ "message_id": message.id })),
                    );
                    self.metrics.record_error(e.kind().as_str(), "classify_message");
                    AiStatus::Error
                }
            };
            result.events_created += tally.events;
            result.es_entries_created += tally.es_entries;

            let message_id = message.id;
            if let Err(e) = self
                .db
                .run_blocking(move |db| db.set_ai_status(message_id, status))
                .await
            {
                error!(message_id = message.id, error = %e, "Failed to store classification state");
                result.errors += 1;
                continue;
            }
            self.metrics.record_classified(status);
            match status {
                AiStatus::Processed => result.processed += 1,
                _ => result.errors += 1,
            }
        }

        let skipped = messages.len() - applied.len();
        if skipped > 0 {
            self.emit(LogEntry::new(
                LogKind::Info,
                format!("{skipped} messages were not covered by the response and stay unprocessed"),
            ));
        }

        self.metrics.record_batch(BatchOutcome::Succeeded, timer.finish());
        self.emit(
            LogEntry::new(LogKind::Info, "Classification finished").with_data(json!({
                "processed": result.processed,
                "events_created": result.events_created,
                "es_entries_created": result.es_entries_created,
                "errors": result.errors,
            })),
        );
        Ok(result)
    }

    /// Resolve the company of one message and store its events and deadlines
    async fn apply_entry(
        &self,
        user_id: i64,
        message: &EmailMessage,
        entry: &BatchEntry,
        companies: &[Company],
        tally: &mut EntryTally,
    ) -> Result<()> {
        let company_id = match (message.company_id, entry.company_name()) {
            (Some(company_id), _) => company_id,
            (None, Some(name)) => match find_company_by_name(companies, name) {
                Some(company) => {
                    let (message_id, company_id) = (message.id, company.id);
                    self.db
                        .run_blocking(move |db| {
                            db.set_message_allocation(
                                message_id,
                                Some(company_id),
                                Some(AllocationMethod::Ai),
                                Some(Utc::now()),
                            )
                        })
                        .await?;
                    self.metrics.record_allocation(AllocationMethod::Ai);
                    info!(message_id = message.id, company_id = company.id, "Message allocated by classifier");
                    company.id
                }
                None => {
                    debug!(message_id = message.id, company_name = name, "No such company, treating as promotional");
                    return Ok(());
                }
            },
            (None, None) => {
                debug!(message_id = message.id, "No company identified");
                return Ok(());
            }
        };

        let default_length = self.default_event_length();
        for candidate in &entry.events {
            let Some(event) = candidate.resolve(default_length) else {
                debug!(message_id = message.id, "Dropping event without title or valid start");
                continue;
            };
            self.store_event(user_id, company_id, &event).await?;
            tally.events += 1;
        }

        for candidate in &entry.deadlines {
            let Some(deadline) = candidate.resolve() else {
                debug!(message_id = message.id, "Dropping deadline without title or valid date");
                continue;
            };
            self.schedule
                .create_es_entry(NewEsEntry {
                    user_id,
                    company_id: Some(company_id),
                    title: deadline.title,
                    deadline: Some(deadline.deadline),
                    status: ES_STATUS_NOT_STARTED.to_string(),
                    memo: deadline.content,
                })
                .await?;
            self.metrics.record_es_entry_created();
            tally.es_entries += 1;
        }

        Ok(())
    }

    /// Store one event, then copy it to the calendar mirror if there is one
    async fn store_event(&self, user_id: i64, company_id: i64, event: &ResolvedEvent) -> Result<()> {
        let stored = self
            .schedule
            .create_event(NewEvent {
                user_id,
                company_id: Some(company_id),
                title: event.title.clone(),
                description: Some(event.description.clone()),
                start_at: event.start_at,
                end_at: Some(event.end_at),
                all_day: false,
                location: Some(event.location.clone()),
                event_type: infer_event_type(&event.title),
                remind_before_minutes: self.schedule_defaults.default_reminder_minutes,
                slack_notify: true,
            })
            .await?;
        self.metrics.record_event_created();

        let Some(mirror) = &self.mirror else {
            return Ok(());
        };
        let request = CalendarEventRequest {
            summary: event.title.clone(),
            description: event.description.clone(),
            start: event.start_at,
            end: event.end_at,
            location: event.location.clone(),
        };
        match mirror.create_event(&request).await {
            Ok(external_id) => {
                if let Err(e) = self.schedule.attach_calendar_id(stored.id, &external_id).await {
                    warn!(event_id = stored.id, error = %e, "Failed to link calendar entry");
                }
            }
            Err(e) => {
                self.emit(LogEntry::new(
                    LogKind::Error,
                    format!("Calendar mirror failed for event {}: {e}", stored.id),
                ));
            }
        }
        Ok(())
    }

    /// Ask the command for the events and deadlines in one message.
    ///
    /// Invalid candidates are dropped; nothing is written to the store.
    pub async fn extract_schedule(&self, message_id: i64) -> Result<ExtractedSchedule> {
        let message = self
            .db
            .run_blocking(move |db| db.get_message(message_id))
            .await?
            .ok_or_else(|| AllocatorError::not_found("message", message_id))?;

        let body_chars = usize::try_from(self.config.single_body_excerpt_chars).unwrap_or(usize::MAX);
        let prompt = build_single_prompt(&message, body_chars, Local::now().date_naive());
        self.emit(LogEntry::new(LogKind::Prompt, "Prompt built").with_data(json!({ "message_id": message_id })));

        let output = self.complete(&prompt).await.inspect_err(|e| {
            self.emit(LogEntry::new(LogKind::Error, format!("Extraction failed: {e}")));
        })?;
        self.emit(LogEntry::new(LogKind::Response, "Response received").with_data(json!({ "output": output })));

        let parsed = parse_schedule_response(&output)?;
        let default_length = self.default_event_length();
        Ok(ExtractedSchedule {
            events: parsed.events.iter().filter_map(|c| c.resolve(default_length)).collect(),
            deadlines: parsed.deadlines.iter().filter_map(|c| c.resolve()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_event_type() {
        assert_eq!(infer_event_type("会社説明会"), EventType::Briefing);
        assert_eq!(infer_event_type("一次面接"), EventType::Interview);
        assert_eq!(infer_event_type("Webテスト受検"), EventType::Test);
        assert_eq!(infer_event_type("Online Seminar"), EventType::Briefing);
        assert_eq!(infer_event_type("懇親会"), EventType::Other);
    }

    #[test]
    fn test_find_company_by_name_prefers_lowest_id() {
        let now = Utc::now();
        let company = |id, name: &str| Company {
            id,
            user_id: 1,
            name: name.to_string(),
            industry: None,
            url: None,
            status: "interested".into(),
            memo: None,
            created_at: now,
            updated_at: now,
        };
        let companies = vec![company(1, "ＡＣＭＥ Holdings"), company(2, "Acme Inc")];
        assert_eq!(find_company_by_name(&companies, "acme").map(|c| c.id), Some(1));
        assert!(find_company_by_name(&companies, "Unknown Startup").is_none());
        assert!(find_company_by_name(&companies, "  ").is_none());
    }

    #[test]
    fn test_closure_is_a_log() {
        let seen = std::sync::Mutex::new(Vec::new());
        let log = |entry: LogEntry| seen.lock().unwrap().push(entry.kind);
        log.log(LogEntry::new(LogKind::Info, "hello"));
        assert_eq!(*seen.lock().unwrap(), vec![LogKind::Info]);
    }
}
