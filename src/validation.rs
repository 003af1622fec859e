use chrono::{DateTime, Utc};

use crate::error::{AllocatorError, Result};
use crate::models::PatternType;

/// Longest accepted rule value, in characters
pub const MAX_PATTERN_VALUE_CHARS: usize = 255;

/// Longest accepted company name, in characters
pub const MAX_COMPANY_NAME_CHARS: usize = 200;

fn invalid(message: impl Into<String>) -> AllocatorError {
    AllocatorError::Validation(message.into())
}

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate company name
    pub fn validate_company_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(invalid("Company name cannot be empty"));
        }

        if name.chars().count() > MAX_COMPANY_NAME_CHARS {
            return Err(invalid(format!(
                "Company name too long (max {MAX_COMPANY_NAME_CHARS} characters)"
            )));
        }

        if name.chars().any(char::is_control) {
            return Err(invalid("Company name contains invalid characters"));
        }

        Ok(())
    }

    /// Validate email format
    pub fn validate_email(email: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Err(invalid("Email cannot be empty"));
        }

        if email.len() > 254 {
            return Err(invalid("Email too long (max 254 characters)"));
        }

        let Some((local_part, domain_part)) = email.split_once('@') else {
            return Err(invalid("Email must contain @ symbol"));
        };

        if domain_part.contains('@') {
            return Err(invalid("Email must have exactly one @ symbol"));
        }

        if local_part.is_empty() || local_part.len() > 64 {
            return Err(invalid("Email local part invalid"));
        }

        if domain_part.is_empty() || !domain_part.contains('.') {
            return Err(invalid("Email domain invalid"));
        }

        if email.chars().any(char::is_whitespace) {
            return Err(invalid("Email cannot contain whitespace"));
        }

        Ok(())
    }

    /// Validate a rule value and return its stored form.
    ///
    /// Values are trimmed. Address rules must look like an e-mail address.
    /// Domain rules are lower-cased and always start with `@`.
    pub fn normalize_pattern_value(pattern_type: PatternType, value: &str) -> Result<String> {
        let value = value.trim();

        if value.is_empty() {
            return Err(invalid("Pattern value cannot be empty"));
        }

        if value.chars().count() > MAX_PATTERN_VALUE_CHARS {
            return Err(invalid(format!(
                "Pattern value too long (max {MAX_PATTERN_VALUE_CHARS} characters)"
            )));
        }

        if value.chars().any(char::is_control) {
            return Err(invalid("Pattern value contains invalid characters"));
        }

        match pattern_type {
            PatternType::Address => {
                Self::validate_email(value)?;
                Ok(value.to_string())
            }
            PatternType::Domain => {
                let domain = value.trim_start_matches('@');
                if domain.is_empty() || domain.contains('@') || domain.chars().any(char::is_whitespace) {
                    return Err(invalid(format!("Invalid domain pattern: {value}")));
                }
                Ok(format!("@{}", domain.to_ascii_lowercase()))
            }
            PatternType::SubjectKeyword | PatternType::BodyKeyword => Ok(value.to_string()),
        }
    }

    /// Validate that an event ends after it starts
    pub fn validate_event_window(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(end) = end {
            if end < start {
                return Err(invalid("Event end cannot be before its start"));
            }
        }
        Ok(())
    }

    /// Validate batch size for processing
    pub fn validate_batch_size(batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(invalid("Batch size must be greater than 0"));
        }

        if batch_size > 10000 {
            return Err(invalid("Batch size too large (max 10,000)"));
        }

        Ok(())
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Validate database URL (`sqlite:` prefix or a bare path)
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }

        if url.contains("://") && !url.starts_with("sqlite://") {
            return Err(invalid("Only SQLite databases are supported"));
        }

        if url.len() > 1000 {
            return Err(invalid("Database URL too long"));
        }

        Ok(())
    }
}
