//! Rule matcher: resolves the company a message belongs to from stored rules.
//!
//! Rule kinds are tried in a fixed order (address, domain, subject keyword,
//! body keyword) and the first kind with a qualifying rule decides. Within a
//! kind the highest priority wins and ties go to the lowest rule id.

use std::cmp::Reverse;

use serde::Serialize;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::db::Database;
use crate::error::{AllocatorError, Result};
use crate::models::{Company, CompanyEmailPattern, EmailMessage, PatternType};

/// The company a message matched and the rule that fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub company: Company,
    pub pattern: CompanyEmailPattern,
    /// Rule kind whose step produced the match
    pub step: PatternType,
}

/// Fold text for keyword comparison: NFKC, then lowercase.
#[must_use]
pub fn fold_keyword(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

/// Whether `value` of kind `pattern_type` matches the message text.
///
/// `subject` and `body` must already be folded with [`fold_keyword`].
fn value_matches(pattern_type: PatternType, value: &str, from_address: &str, subject: &str, body: &str) -> bool {
    match pattern_type {
        PatternType::Address => from_address.trim() == value,
        PatternType::Domain => {
            let (from, suffix) = (from_address.trim().as_bytes(), value.as_bytes());
            !suffix.is_empty()
                && from.len() >= suffix.len()
                && from[from.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
        }
        PatternType::SubjectKeyword => keyword_in(subject, value),
        PatternType::BodyKeyword => keyword_in(body, value),
    }
}

fn keyword_in(folded_haystack: &str, keyword: &str) -> bool {
    let needle = fold_keyword(keyword.trim());
    !needle.is_empty() && folded_haystack.contains(&needle)
}

/// Whether an enabled rule applies to a message. Disabled rules never match.
#[must_use]
pub fn pattern_matches(pattern: &CompanyEmailPattern, message: &EmailMessage) -> bool {
    pattern.enabled
        && value_matches(
            pattern.pattern_type,
            &pattern.pattern_value,
            &message.from_address,
            &fold_keyword(message.subject_text()),
            &fold_keyword(message.body()),
        )
}

/// Pick the winning rule from an in-memory set.
///
/// Same ordering as [`RuleMatcher::match_message`]: step order first, then
/// priority descending, then lowest id.
#[must_use]
pub fn select_best<'a>(patterns: &'a [CompanyEmailPattern], message: &EmailMessage) -> Option<&'a CompanyEmailPattern> {
    let subject = fold_keyword(message.subject_text());
    let body = fold_keyword(message.body());

    PatternType::EVALUATION_ORDER.iter().find_map(|step| {
        patterns
            .iter()
            .filter(|p| p.enabled && p.pattern_type == *step)
            .filter(|p| value_matches(p.pattern_type, &p.pattern_value, &message.from_address, &subject, &body))
            .min_by_key(|p| (Reverse(p.priority), p.id))
    })
}

/// Evaluates stored rules against messages
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    db: Database,
}

impl RuleMatcher {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find the company for a message, or `None` when no enabled rule applies.
    ///
    /// Only rules of companies owned by the message's account holder are considered.
    pub fn match_message(&self, message: &EmailMessage) -> Result<Option<MatchOutcome>> {
        let account = self
            .db
            .get_account(message.account_id)?
            .ok_or_else(|| AllocatorError::not_found("account", message.account_id))?;

        let subject = fold_keyword(message.subject_text());
        let body = fold_keyword(message.body());

        for step in PatternType::EVALUATION_ORDER {
            // Rows arrive in priority DESC, id ASC order, so the first hit wins
            let candidates = self.db.list_enabled_patterns(account.user_id, step)?;

            for pattern in candidates {
                if !value_matches(step, &pattern.pattern_value, &message.from_address, &subject, &body) {
                    continue;
                }

                match self.db.get_company(pattern.company_id)? {
                    Some(company) => {
                        debug!(
                            message_id = message.id,
                            company_id = company.id,
                            pattern_id = pattern.id,
                            step = step.as_str(),
                            "Rule matched"
                        );
                        return Ok(Some(MatchOutcome { company, pattern, step }));
                    }
                    None => warn!(pattern_id = pattern.id, "Skipping rule whose company no longer exists"),
                }
            }
        }

        debug!(message_id = message.id, "No rule matched");
        Ok(None)
    }
}
