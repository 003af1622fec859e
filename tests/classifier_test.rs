mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use common::TestDb;
use mockall::mock;
use serde_json::json;

use career_inbox::classifier::runner::CompletionRunner;
use career_inbox::classifier::{BatchResult, BulkClassifier, LogEntry, LogKind};
use career_inbox::db::Database;
use career_inbox::metrics::MetricsCollector;
use career_inbox::models::{AiStatus, AllocationMethod, EsEntry, Event, EventType, NewEsEntry, NewEvent};
use career_inbox::repository::{CalendarEventRequest, CalendarMirror, ScheduleRepository};
use career_inbox::AllocatorError;

mock! {
    pub Runner {}

    #[async_trait]
    impl CompletionRunner for Runner {
        async fn complete(&self, prompt: &str) -> career_inbox::Result<String>;
    }
}

mock! {
    pub Mirror {}

    #[async_trait]
    impl CalendarMirror for Mirror {
        async fn create_event(&self, request: &CalendarEventRequest) -> career_inbox::Result<String>;
    }
}

/// Runner that answers every prompt with the same scripted reply
struct ScriptedRunner {
    reply: Box<dyn Fn() -> career_inbox::Result<String> + Send + Sync>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn replying(text: impl Into<String>) -> Arc<Self> {
        let text = text.into();
        Arc::new(Self {
            reply: Box::new(move || Ok(text.clone())),
            prompts: Mutex::default(),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(|| Err(AllocatorError::ExternalInvocation("command exited with code 1".into()))),
            prompts: Mutex::default(),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionRunner for ScriptedRunner {
    async fn complete(&self, prompt: &str) -> career_inbox::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.reply)()
    }
}

/// Schedule store that rejects events titled "boom"
struct FlakySchedule {
    db: Database,
}

#[async_trait]
impl ScheduleRepository for FlakySchedule {
    async fn create_event(&self, event: NewEvent) -> career_inbox::Result<Event> {
        if event.title == "boom" {
            return Err(AllocatorError::Io(std::io::Error::other("disk full")));
        }
        self.db.create_event(&event)
    }

    async fn attach_calendar_id(&self, event_id: i64, external_id: &str) -> career_inbox::Result<()> {
        self.db.attach_calendar_id(event_id, external_id).map(|_| ())
    }

    async fn create_es_entry(&self, entry: NewEsEntry) -> career_inbox::Result<EsEntry> {
        self.db.create_es_entry(&entry)
    }
}

struct FailingMirror;

#[async_trait]
impl CalendarMirror for FailingMirror {
    async fn create_event(&self, _request: &CalendarEventRequest) -> career_inbox::Result<String> {
        Err(AllocatorError::ExternalInvocation("calendar unavailable".into()))
    }
}

#[tokio::test]
async fn test_no_unprocessed_messages_skips_the_command() {
    let t = TestDb::new();
    t.account(1, "me@example.com");

    let mut runner = MockRunner::new();
    runner.expect_complete().times(0);
    let metrics = MetricsCollector::default();

    let classifier = BulkClassifier::new(t.db.clone(), Arc::new(runner)).with_metrics(metrics.clone());
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result, BatchResult::default());
    assert_eq!(metrics.snapshot().batches_empty, 1);
}

#[tokio::test]
async fn test_messages_missing_from_reply_stay_unprocessed() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let acme = t.company(1, "Acme Inc");
    let a = t.message(account.id, "a", "hr@acme.com", "一次面接のご案内", "");
    let b = t.message(account.id, "b", "news@shop.example", "Sale", "");
    let c = t.message(account.id, "c", "x@y.com", "Hello", "");

    let reply = json!([
        {
            "id": a.id,
            "company_name": "acme",
            "events": [{"title": "一次面接", "start_at": "2026-04-01T10:00:00+09:00"}],
            "deadlines": [{"title": "ES提出", "deadline": "2026-03-20T23:59:00+09:00", "content": "400字"}]
        },
        {"id": b.id, "company_name": null, "events": [], "deadlines": []}
    ]);
    let runner = ScriptedRunner::replying(format!("Here is the result:\n```json\n{reply}\n```"));

    let classifier = BulkClassifier::new(t.db.clone(), runner.clone());
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(
        result,
        BatchResult {
            processed: 2,
            events_created: 1,
            es_entries_created: 1,
            errors: 0,
        }
    );
    assert_eq!(runner.calls(), 1);

    let a_after = t.reload(a.id);
    assert_eq!(a_after.ai_processed, AiStatus::Processed);
    assert_eq!(a_after.company_id, Some(acme.id));
    assert_eq!(a_after.allocation_method, Some(AllocationMethod::Ai));
    assert!(a_after.allocated_at.is_some());

    assert_eq!(t.reload(b.id).ai_processed, AiStatus::Processed);
    assert_eq!(t.reload(c.id).ai_processed, AiStatus::Unprocessed);

    let entries = t.db.list_es_entries(1).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, "not_started");
    assert_eq!(entries[0].memo.as_deref(), Some("400字"));
    assert_eq!(entries[0].company_id, Some(acme.id));
}

#[tokio::test]
async fn test_command_failure_aborts_the_batch() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let acme = t.company(1, "Acme");
    let ids: Vec<i64> = (0..3)
        .map(|i| t.message(account.id, &format!("m{i}"), "hr@acme.com", "Acme", "").id)
        .collect();
    let metrics = MetricsCollector::default();

    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::failing()).with_metrics(metrics.clone());
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.processed, 0);
    assert_eq!(result.errors, 3);
    for id in ids {
        let message = t.reload(id);
        assert_eq!(message.ai_processed, AiStatus::Unprocessed);
        assert!(message.company_id.is_none());
    }
    assert!(t.db.list_events_by_company(acme.id).unwrap().is_empty());
    assert_eq!(metrics.snapshot().batches_failed, 1);
}

#[tokio::test]
async fn test_unparseable_reply_aborts_the_batch() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let m = t.message(account.id, "m", "a@b.com", "s", "");

    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying("I cannot help with that."));
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.errors, 1);
    assert_eq!(t.reload(m.id).ai_processed, AiStatus::Unprocessed);
}

#[tokio::test]
async fn test_unknown_company_is_treated_as_promotional() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    t.company(1, "Acme Inc");
    let m = t.message(account.id, "m", "hello@startup.example", "Join us", "");

    let reply = json!([{
        "id": m.id,
        "company_name": "Unknown Startup",
        "events": [{"title": "Meetup", "start_at": "2026-04-01T19:00:00+09:00"}],
        "deadlines": [{"title": "Apply", "deadline": "2026-04-10"}]
    }]);
    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(reply.to_string()));
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.events_created, 0);
    assert_eq!(result.es_entries_created, 0);

    let after = t.reload(m.id);
    assert_eq!(after.ai_processed, AiStatus::Processed);
    assert!(after.company_id.is_none());
    assert!(t.db.list_events(1).unwrap().is_empty());
    assert!(t.db.list_es_entries(1).unwrap().is_empty());
}

#[tokio::test]
async fn test_event_defaults_and_invalid_candidates() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let acme = t.company(1, "Acme");
    let m = t.message(account.id, "m", "hr@acme.com", "Acme", "");
    t.db.set_message_allocation(m.id, Some(acme.id), Some(AllocationMethod::Manual), Some(Utc::now()))
        .unwrap();

    let reply = json!([{
        "id": m.id.to_string(),
        "company_name": "Some Other Name",
        "events": [
            {"title": "最終面接", "start_at": "2026-04-01T10:00:00+09:00", "end_at": "not a time"},
            {"title": "会社説明会", "start_at": "来週のどこか"},
            {"title": "", "start_at": "2026-04-02T10:00:00+09:00"}
        ],
        "deadlines": [
            {"title": "ES", "deadline": "soon"},
            {"title": "Webテスト受検", "deadline": "2026-03-25T23:59:00+09:00"}
        ]
    }]);
    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(reply.to_string()));
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.events_created, 1);
    assert_eq!(result.es_entries_created, 1);

    // The existing manual allocation wins over the reply's company name
    let after = t.reload(m.id);
    assert_eq!(after.company_id, Some(acme.id));
    assert_eq!(after.allocation_method, Some(AllocationMethod::Manual));

    let events = t.db.list_events_by_company(acme.id).unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    let start = Utc.with_ymd_and_hms(2026, 4, 1, 1, 0, 0).unwrap();
    assert_eq!(event.start_at, start);
    assert_eq!(event.end_at, Some(start + Duration::hours(1)));
    assert_eq!(event.remind_before_minutes, 30);
    assert!(event.slack_notify);
    assert_eq!(event.event_type, EventType::Interview);
    assert_eq!(event.location.as_deref(), Some(""));
    assert_eq!(event.description.as_deref(), Some(""));
}

#[tokio::test]
async fn test_calendar_mirror_success_links_event() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    t.company(1, "Acme");
    let m = t.message(account.id, "m", "hr@acme.com", "Acme", "");

    let mut mirror = MockMirror::new();
    mirror
        .expect_create_event()
        .withf(|request: &CalendarEventRequest| request.summary == "Acme 説明会" && request.location == "Online")
        .times(1)
        .returning(|_| Ok("gcal-123".to_string()));

    let reply = json!([{
        "id": m.id,
        "company_name": "Acme",
        "events": [{"title": "Acme 説明会", "start_at": "2026-04-01T10:00:00Z", "location": "Online"}]
    }]);
    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(reply.to_string()))
        .with_calendar_mirror(Arc::new(mirror));
    classifier.process_unprocessed(1).await.unwrap();

    let events = t.db.list_events(1).unwrap();
    assert_eq!(events[0].google_calendar_event_id.as_deref(), Some("gcal-123"));
    assert_eq!(events[0].event_type, EventType::Briefing);
}

#[tokio::test]
async fn test_calendar_mirror_failure_does_not_fail_the_message() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    t.company(1, "Acme");
    let m = t.message(account.id, "m", "hr@acme.com", "Acme", "");

    let reply = json!([{
        "id": m.id,
        "company_name": "Acme",
        "events": [{"title": "面接", "start_at": "2026-04-01T10:00:00Z"}]
    }]);
    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(reply.to_string()))
        .with_calendar_mirror(Arc::new(FailingMirror));
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.events_created, 1);
    assert_eq!(result.errors, 0);
    assert!(t.db.list_events(1).unwrap()[0].google_calendar_event_id.is_none());
}

#[tokio::test]
async fn test_failure_in_one_message_does_not_affect_others() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    t.company(1, "Acme");
    let bad = t.message(account.id, "bad", "hr@acme.com", "Acme", "");
    let good = t.message(account.id, "good", "hr@acme.com", "Acme", "");

    let reply = json!([
        {"id": bad.id, "company_name": "Acme", "events": [{"title": "boom", "start_at": "2026-04-01T10:00:00Z"}]},
        {"id": good.id, "company_name": "Acme", "events": [{"title": "面接", "start_at": "2026-04-02T10:00:00Z"}]}
    ]);
    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(reply.to_string()))
        .with_schedule_repository(Arc::new(FlakySchedule { db: t.db.clone() }));
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.errors, 1);
    assert_eq!(result.events_created, 1);
    assert_eq!(t.reload(bad.id).ai_processed, AiStatus::Error);
    assert_eq!(t.reload(good.id).ai_processed, AiStatus::Processed);
}

#[tokio::test]
async fn test_duplicate_entries_are_applied_once() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    t.company(1, "Acme");
    let m = t.message(account.id, "m", "hr@acme.com", "Acme", "");

    let entry = json!({"id": m.id, "company_name": "Acme", "events": [{"title": "面接", "start_at": "2026-04-02T10:00:00Z"}]});
    let reply = json!([entry.clone(), entry]);
    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(reply.to_string()));
    let result = classifier.process_unprocessed(1).await.unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.events_created, 1);
    assert_eq!(t.db.list_events(1).unwrap().len(), 1);
}

#[tokio::test]
async fn test_prompt_embeds_messages_and_log_sees_progress() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let m = t.message(account.id, "m", "hr@acme.com", "選考のご案内", &"あ".repeat(1500));

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    let log = move |entry: LogEntry| sink.lock().unwrap().push(entry.kind);

    let runner = ScriptedRunner::replying("[]");
    let classifier = BulkClassifier::new(t.db.clone(), runner.clone()).with_log(Arc::new(log));
    let result = classifier.process_unprocessed(1).await.unwrap();
    assert_eq!(result, BatchResult::default());
    assert_eq!(t.reload(m.id).ai_processed, AiStatus::Unprocessed);

    let prompt = runner.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains(&format!("\"id\":{}", m.id)));
    assert!(prompt.contains("選考のご案内"));
    assert!(prompt.contains(&"あ".repeat(1000)));
    assert!(!prompt.contains(&"あ".repeat(1001)));

    let kinds = kinds.lock().unwrap();
    assert!(kinds.contains(&LogKind::Prompt));
    assert!(kinds.contains(&LogKind::Response));
}

#[tokio::test]
async fn test_extract_schedule_returns_valid_candidates_only() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let m = t.message(account.id, "m", "hr@acme.com", "面接日程", "4/1 10:00 から面接です");

    let reply = r#"Sure. {"events": [{"title": "面接", "start_at": "2026-04-01T10:00:00Z", "end_at": "2026-04-01T10:30:00Z"}, {"title": "x"}], "deadlines": [{"title": "", "deadline": "2026-04-01"}]}"#;
    let runner = ScriptedRunner::replying(reply);
    let classifier = BulkClassifier::new(t.db.clone(), runner.clone());
    let extracted = classifier.extract_schedule(m.id).await.unwrap();

    assert_eq!(extracted.events.len(), 1);
    assert_eq!(extracted.events[0].end_at - extracted.events[0].start_at, Duration::minutes(30));
    assert!(extracted.deadlines.is_empty());
    assert!(runner.prompts.lock().unwrap()[0].contains("Subject: 面接日程"));

    // Nothing is stored and the message is untouched
    assert!(t.db.list_events(1).unwrap().is_empty());
    assert_eq!(t.reload(m.id).ai_processed, AiStatus::Unprocessed);

    assert!(classifier.extract_schedule(999).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_extract_schedule_propagates_command_failure() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let m = t.message(account.id, "m", "hr@acme.com", "s", "b");

    let classifier = BulkClassifier::new(t.db.clone(), ScriptedRunner::failing());
    let err = classifier.extract_schedule(m.id).await.unwrap_err();
    assert_eq!(err.kind(), career_inbox::ErrorKind::ExternalInvocationFailure);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_users_on_multi_thread_runtime() {
    let t = TestDb::new();
    let mut replies = Vec::new();
    for user in [1, 2] {
        let account = t.account(user, &format!("me{user}@example.com"));
        t.company(user, "Acme");
        let message = t.message(account.id, &format!("m{user}"), "hr@acme.com", "説明会", "");
        replies.push((
            message.id,
            json!([{
                "id": message.id,
                "company_name": "Acme",
                "events": [{"title": "会社説明会", "start_at": "2026-04-02T13:00:00+09:00"}],
                "deadlines": []
            }])
            .to_string(),
        ));
    }

    let first = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(replies[0].1.clone()));
    let second = BulkClassifier::new(t.db.clone(), ScriptedRunner::replying(replies[1].1.clone()));
    let (a, b) = tokio::join!(first.process_unprocessed(1), second.process_unprocessed(2));

    for result in [a.unwrap(), b.unwrap()] {
        assert_eq!(result.processed, 1);
        assert_eq!(result.events_created, 1);
    }
    for (message_id, _) in &replies {
        let message = t.reload(*message_id);
        assert_eq!(message.ai_processed, AiStatus::Processed);
        assert_eq!(message.allocation_method, Some(AllocationMethod::Ai));
    }
    for user in [1, 2] {
        let events = t.db.list_events(user).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Briefing);
    }
}
