use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};

use crate::error::{AllocatorError, Result};

/// Environment variable prefix; keys look like `CAREER_INBOX__CLASSIFIER__TIMEOUT_SECS`
pub const ENV_PREFIX: &str = "CAREER_INBOX";

/// Application configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub classifier: ClassifierConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory and file name prefix for the daily JSON log; none disables file logging
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// External completion command settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Shell command; may contain `{{prompt_file}}` or `{{prompt}}`
    pub command_template: String,
    pub timeout_secs: u64,
    pub max_output_bytes: u64,
    /// Body excerpt per message in the bulk prompt
    pub body_excerpt_chars: u64,
    /// Body excerpt in the single-message prompt
    pub single_body_excerpt_chars: u64,
}

/// Defaults applied to events created from classifier output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub default_event_minutes: i64,
    pub default_reminder_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/career-inbox.db".to_string(),
                max_connections: 8,
                connection_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            classifier: ClassifierConfig {
                command_template: "claude -p".to_string(),
                timeout_secs: 300,
                max_output_bytes: 10 * 1024 * 1024,
                body_excerpt_chars: 1000,
                single_body_excerpt_chars: 2000,
            },
            schedule: ScheduleConfig {
                default_event_minutes: 60,
                default_reminder_minutes: 30,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Self::builder_with_defaults()?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("career-inbox").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Self::finish(config)
    }

    /// Load defaults overlaid with a single file (format inferred from the extension)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config = Self::builder_with_defaults()?
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Self::finish(config)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>> {
        let mut builder = Config::builder();
        for (key, value) in Self::default().default_entries() {
            builder = builder.set_default(key, value)?;
        }
        Ok(builder)
    }

    fn finish(config: Config) -> Result<Self> {
        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AllocatorError::InvalidConfig(msg));

        // Validate database config
        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty".into());
        }
        if self.database.max_connections == 0 {
            return invalid("max_connections must be greater than 0".into());
        }
        if self.database.connection_timeout_secs == 0 {
            return invalid("connection_timeout_secs must be greater than 0".into());
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return invalid(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return invalid(format!(
                "Invalid log format: {}. Must be one of: {valid_formats:?}",
                self.logging.format
            ));
        }

        // Validate classifier config
        if self.classifier.command_template.trim().is_empty() {
            return invalid("classifier.command_template must not be empty".into());
        }
        if self.classifier.timeout_secs == 0 {
            return invalid("classifier.timeout_secs must be greater than 0".into());
        }
        if self.classifier.max_output_bytes == 0 {
            return invalid("classifier.max_output_bytes must be greater than 0".into());
        }
        if self.classifier.body_excerpt_chars == 0 || self.classifier.single_body_excerpt_chars == 0 {
            return invalid("classifier body excerpt lengths must be greater than 0".into());
        }

        // Validate schedule config
        if self.schedule.default_event_minutes <= 0 {
            return invalid("schedule.default_event_minutes must be greater than 0".into());
        }
        if self.schedule.default_reminder_minutes < 0 {
            return invalid("schedule.default_reminder_minutes must not be negative".into());
        }

        Ok(())
    }

    /// Flatten into dotted keys for `ConfigBuilder::set_default`
    fn default_entries(self) -> Vec<(&'static str, config::Value)> {
        let mut entries = vec![
            ("database.url", config::Value::from(self.database.url)),
            ("database.max_connections", config::Value::from(self.database.max_connections)),
            (
                "database.connection_timeout_secs",
                config::Value::from(self.database.connection_timeout_secs),
            ),
            ("logging.level", config::Value::from(self.logging.level)),
            ("logging.format", config::Value::from(self.logging.format)),
            ("classifier.command_template", config::Value::from(self.classifier.command_template)),
            ("classifier.timeout_secs", config::Value::from(self.classifier.timeout_secs)),
            ("classifier.max_output_bytes", config::Value::from(self.classifier.max_output_bytes)),
            ("classifier.body_excerpt_chars", config::Value::from(self.classifier.body_excerpt_chars)),
            (
                "classifier.single_body_excerpt_chars",
                config::Value::from(self.classifier.single_body_excerpt_chars),
            ),
            ("schedule.default_event_minutes", config::Value::from(self.schedule.default_event_minutes)),
            (
                "schedule.default_reminder_minutes",
                config::Value::from(self.schedule.default_reminder_minutes),
            ),
        ];
        if let Some(file_path) = self.logging.file_path {
            entries.push(("logging.file_path", config::Value::from(file_path)));
        }
        entries
    }
}
