mod common;

use chrono::{Duration, TimeZone, Utc};
use common::TestDb;

use career_inbox::ErrorKind;

use career_inbox::models::{
    AiStatus, AllocationMethod, CompanyPatch, EsEntryPatch, EventPatch, EventType, NewEsEntry, NewEvent, NewPattern,
    PatternPatch, PatternType, ES_STATUS_NOT_STARTED,
};

#[test]
fn test_database_creation_and_initialization() {
    let t = TestDb::new();

    // Test that we can get a connection
    let _conn = t.db.get_connection().expect("Failed to get database connection");
    assert!(t.db.list_companies(1).unwrap().is_empty());
}

#[test]
fn test_reopening_existing_database() {
    let dir = tempfile::TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("nested/app.db").display());

    let first = career_inbox::Database::new(&url).expect("Failed to create database");
    first.create_company(&career_inbox::models::NewCompany::named(1, "Acme")).unwrap();
    drop(first);

    let second = career_inbox::Database::new(&url).expect("Failed to reopen database");
    assert_eq!(second.list_companies(1).unwrap().len(), 1);
}

#[test]
fn test_company_crud() {
    let t = TestDb::new();
    let acme = t.company(1, "Acme Inc");
    t.company(1, "Globex");
    t.company(2, "Acme Other User");

    assert_eq!(acme.status, "interested");
    assert_eq!(t.db.list_companies(1).unwrap().len(), 2);
    assert_eq!(t.db.search_companies(1, "acme").unwrap().len(), 1);

    let updated = t
        .db
        .update_company(
            acme.id,
            &CompanyPatch {
                status: Some("applied".into()),
                ..CompanyPatch::default()
            },
        )
        .unwrap();
    assert_eq!(updated.status, "applied");
    assert_eq!(updated.name, "Acme Inc");

    t.db.delete_company(acme.id).unwrap();
    assert!(t.db.get_company(acme.id).unwrap().is_none());
    assert!(t.db.delete_company(acme.id).unwrap_err().is_not_found());
    assert!(t.db.update_company(acme.id, &CompanyPatch::default()).unwrap_err().is_not_found());
}

#[test]
fn test_account_defaults_and_sync_time() {
    let t = TestDb::new();
    let account = t.account(1, "  me@example.com ");
    assert_eq!(account.email_address, "me@example.com");
    assert_eq!(account.provider, "gmail");
    assert!(account.last_sync_at.is_none());

    let at = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
    t.db.touch_account_sync(account.id, at).unwrap();
    assert_eq!(t.db.get_account(account.id).unwrap().unwrap().last_sync_at, Some(at));
    assert!(t.db.touch_account_sync(999, at).unwrap_err().is_not_found());
}

#[test]
fn test_message_insert_is_deduplicated_by_external_id() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let first = t.message(account.id, "ext-1", "hr@acme.com", "Hello", "Body");

    assert_eq!(first.ai_processed, AiStatus::Unprocessed);
    assert!(first.company_id.is_none());
    assert!(!first.is_read);

    let (again, inserted) = t
        .db
        .insert_message_if_absent(&career_inbox::models::NewEmailMessage {
            account_id: account.id,
            external_id: "ext-1".into(),
            subject: Some("Different".into()),
            from_address: "x@y.com".into(),
            from_name: None,
            body_text: None,
            body_html: None,
            received_at: Utc::now(),
        })
        .unwrap();
    assert!(!inserted);
    assert_eq!(again.id, first.id);
    assert_eq!(again.subject.as_deref(), Some("Hello"));
}

#[test]
fn test_allocation_columns_and_auto_clearing() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let company = t.company(1, "Acme");
    let auto = t.message(account.id, "a", "a@acme.com", "s", "b");
    let manual = t.message(account.id, "m", "m@acme.com", "s", "b");
    let ai = t.message(account.id, "i", "i@acme.com", "s", "b");

    let now = Some(Utc::now());
    t.db.set_message_allocation(auto.id, Some(company.id), Some(AllocationMethod::Auto), now).unwrap();
    t.db.set_message_allocation(manual.id, Some(company.id), Some(AllocationMethod::Manual), now).unwrap();
    t.db.set_message_allocation(ai.id, Some(company.id), Some(AllocationMethod::Ai), now).unwrap();

    assert_eq!(t.db.list_messages_by_company(company.id).unwrap().len(), 3);
    assert_eq!(t.db.clear_auto_allocations(account.id).unwrap(), 1);

    let cleared = t.reload(auto.id);
    assert!(cleared.company_id.is_none());
    assert!(cleared.allocation_method.is_none());
    assert!(cleared.allocated_at.is_none());
    assert_eq!(t.reload(manual.id).allocation_method, Some(AllocationMethod::Manual));
    assert_eq!(t.reload(ai.id).company_id, Some(company.id));

    assert_eq!(t.db.list_unallocated_messages(account.id).unwrap().len(), 1);
    assert!(t
        .db
        .set_message_allocation(999, None, None, None)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_deleting_company_detaches_messages_and_drops_patterns() {
    let t = TestDb::new();
    let account = t.account(1, "me@example.com");
    let company = t.company(1, "Acme");
    let pattern = t.pattern(company.id, PatternType::Domain, "@acme.com", 0);
    let message = t.message(account.id, "x", "a@acme.com", "s", "b");
    t.db.set_message_allocation(message.id, Some(company.id), Some(AllocationMethod::Manual), Some(Utc::now()))
        .unwrap();

    t.db.delete_company(company.id).unwrap();

    assert!(t.db.get_pattern(pattern.id).unwrap().is_none());
    assert!(t.reload(message.id).company_id.is_none());
}

#[test]
fn test_unprocessed_listing_is_scoped_to_user() {
    let t = TestDb::new();
    let mine = t.account(1, "me@example.com");
    let theirs = t.account(2, "them@example.com");
    let a = t.message(mine.id, "a", "x@a.com", "s", "b");
    let b = t.message(mine.id, "b", "x@b.com", "s", "b");
    t.message(theirs.id, "c", "x@c.com", "s", "b");

    t.db.set_ai_status(b.id, AiStatus::Processed).unwrap();

    let pending = t.db.list_unprocessed_messages(1).unwrap();
    assert_eq!(pending.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a.id]);

    let processed = t.reload(b.id);
    assert_eq!(processed.ai_processed, AiStatus::Processed);
    assert!(processed.ai_processed_at.is_some());
}

#[test]
fn test_pattern_ordering_and_updates() {
    let t = TestDb::new();
    let acme = t.company(1, "Acme");
    let other_user = t.company(2, "Acme Elsewhere");

    let low = t.pattern(acme.id, PatternType::Domain, "@acme.com", 1);
    let high = t.pattern(acme.id, PatternType::Domain, "@acme.co.jp", 5);
    t.pattern(other_user.id, PatternType::Domain, "@acme.com", 9);

    let listed = t.db.list_patterns_by_company(acme.id).unwrap();
    assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![high.id, low.id]);

    let enabled = t.db.list_enabled_patterns(1, PatternType::Domain).unwrap();
    assert_eq!(enabled.len(), 2);

    t.db.set_pattern_enabled(high.id, false).unwrap();
    let enabled = t.db.list_enabled_patterns(1, PatternType::Domain).unwrap();
    assert_eq!(enabled.iter().map(|p| p.id).collect::<Vec<_>>(), vec![low.id]);

    let changed = t
        .db
        .update_pattern(
            low.id,
            &PatternPatch {
                priority: Some(7),
                ..PatternPatch::default()
            },
        )
        .unwrap();
    assert_eq!(changed.priority, 7);
    assert_eq!(changed.pattern_value, "@acme.com");
    assert!(changed.enabled);

    let default_priority = t
        .db
        .create_pattern(acme.id, &NewPattern::new(PatternType::SubjectKeyword, "Acme"))
        .unwrap();
    assert_eq!(default_priority.priority, 0);

    t.db.delete_pattern(low.id).unwrap();
    assert!(t.db.delete_pattern(low.id).unwrap_err().is_not_found());
}

#[test]
fn test_events_and_es_entries() {
    let t = TestDb::new();
    let company = t.company(1, "Acme");
    let start = Utc.with_ymd_and_hms(2026, 4, 1, 1, 0, 0).unwrap();

    let event = t
        .db
        .create_event(&NewEvent {
            user_id: 1,
            company_id: Some(company.id),
            title: "一次面接".into(),
            description: Some(String::new()),
            start_at: start,
            end_at: Some(start + Duration::hours(1)),
            all_day: false,
            location: Some("Tokyo".into()),
            event_type: EventType::Interview,
            remind_before_minutes: 30,
            slack_notify: true,
        })
        .unwrap();
    assert_eq!(event.event_type, EventType::Interview);
    assert!(event.google_calendar_event_id.is_none());

    let linked = t.db.attach_calendar_id(event.id, "gcal-1").unwrap();
    assert_eq!(linked.google_calendar_event_id.as_deref(), Some("gcal-1"));
    assert_eq!(linked.title, "一次面接");
    assert_eq!(t.db.list_events_by_company(company.id).unwrap().len(), 1);
    assert!(t.db.attach_calendar_id(999, "x").unwrap_err().is_not_found());

    let entry = t
        .db
        .create_es_entry(&NewEsEntry {
            user_id: 1,
            company_id: Some(company.id),
            title: "ES提出".into(),
            deadline: Some(start),
            status: ES_STATUS_NOT_STARTED.into(),
            memo: Some("800字".into()),
        })
        .unwrap();
    assert_eq!(entry.status, "not_started");

    let submitted = t
        .db
        .update_es_entry(
            entry.id,
            &EsEntryPatch {
                status: Some("submitted".into()),
                ..EsEntryPatch::default()
            },
        )
        .unwrap();
    assert_eq!(submitted.status, "submitted");
    assert_eq!(submitted.memo.as_deref(), Some("800字"));
    assert_eq!(t.db.list_es_entries(1).unwrap().len(), 1);
}

#[test]
fn test_event_window_is_validated() {
    let t = TestDb::new();
    let start = Utc.with_ymd_and_hms(2026, 4, 1, 1, 0, 0).unwrap();
    let new_event = NewEvent {
        user_id: 1,
        company_id: None,
        title: "説明会".into(),
        description: None,
        start_at: start,
        end_at: Some(start - Duration::minutes(1)),
        all_day: false,
        location: None,
        event_type: EventType::Briefing,
        remind_before_minutes: 30,
        slack_notify: false,
    };
    let err = t.db.create_event(&new_event).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert!(t.db.list_events(1).unwrap().is_empty());

    let event = t
        .db
        .create_event(&NewEvent {
            end_at: Some(start + Duration::hours(2)),
            ..new_event
        })
        .unwrap();

    // Moving the start past the stored end is rejected
    let err = t
        .db
        .update_event(
            event.id,
            &EventPatch {
                start_at: Some(start + Duration::hours(3)),
                ..EventPatch::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(t.db.get_event(event.id).unwrap().unwrap().start_at, start);

    let moved = t
        .db
        .update_event(
            event.id,
            &EventPatch {
                start_at: Some(start + Duration::hours(3)),
                end_at: Some(start + Duration::hours(4)),
                ..EventPatch::default()
            },
        )
        .unwrap();
    assert_eq!(moved.start_at, start + Duration::hours(3));

    let err = t
        .db
        .update_event(
            999,
            &EventPatch {
                end_at: Some(start),
                ..EventPatch::default()
            },
        )
        .unwrap_err();
    assert!(err.is_not_found());
}
