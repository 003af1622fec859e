//! Comprehensive unit tests for config.rs module

use std::io::Write;

use career_inbox::config::AppConfig;
use career_inbox::ErrorKind;

#[test]
fn test_default_config_values() {
    let config = AppConfig::default();

    assert_eq!(config.database.url, "sqlite:data/career-inbox.db");
    assert_eq!(config.database.max_connections, 8);
    assert_eq!(config.database.connection_timeout_secs, 30);
}

#[test]
fn test_default_logging_config() {
    let config = AppConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_default_classifier_config() {
    let config = AppConfig::default();

    assert_eq!(config.classifier.command_template, "claude -p");
    assert_eq!(config.classifier.timeout_secs, 300);
    assert_eq!(config.classifier.max_output_bytes, 10 * 1024 * 1024);
    assert_eq!(config.classifier.body_excerpt_chars, 1000);
    assert_eq!(config.classifier.single_body_excerpt_chars, 2000);
}

#[test]
fn test_default_schedule_config() {
    let config = AppConfig::default();

    assert_eq!(config.schedule.default_event_minutes, 60);
    assert_eq!(config.schedule.default_reminder_minutes, 30);
}

#[test]
fn test_default_config_is_valid() {
    assert!(AppConfig::default().validate().is_ok());
}

#[test]
fn test_validation_rejects_bad_values() {
    let cases: Vec<fn(&mut AppConfig)> = vec![
        |c| c.database.url = "  ".into(),
        |c| c.database.max_connections = 0,
        |c| c.database.connection_timeout_secs = 0,
        |c| c.logging.level = "verbose".into(),
        |c| c.logging.format = "xml".into(),
        |c| c.classifier.command_template = String::new(),
        |c| c.classifier.timeout_secs = 0,
        |c| c.classifier.max_output_bytes = 0,
        |c| c.classifier.body_excerpt_chars = 0,
        |c| c.schedule.default_event_minutes = 0,
        |c| c.schedule.default_reminder_minutes = -1,
    ];

    for (i, mutate) in cases.into_iter().enumerate() {
        let mut config = AppConfig::default();
        mutate(&mut config);
        let err = config.validate().expect_err(&format!("case {i} should be rejected"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

#[test]
fn test_load_from_toml_file_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[database]
url = "sqlite:/tmp/inbox.db"

[classifier]
command_template = "my-llm --file {{{{prompt_file}}}}"
timeout_secs = 60

[logging]
level = "debug"
file_path = "/tmp/logs/career-inbox.log"
"#
    )
    .unwrap();

    let config = AppConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.database.url, "sqlite:/tmp/inbox.db");
    assert_eq!(config.database.max_connections, 8);
    assert_eq!(config.classifier.command_template, "my-llm --file {{prompt_file}}");
    assert_eq!(config.classifier.timeout_secs, 60);
    assert_eq!(config.classifier.max_output_bytes, 10 * 1024 * 1024);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file_path.as_deref(), Some("/tmp/logs/career-inbox.log"));
    assert_eq!(config.schedule.default_reminder_minutes, 30);
}

#[test]
fn test_load_from_file_validates() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[logging]\nformat = \"yaml\"").unwrap();

    let err = AppConfig::load_from_file(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_config_serialization_round_trip() {
    let config = AppConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: AppConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
