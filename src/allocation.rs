//! Allocation service: assigns messages to companies and manages matching rules.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{AllocatorError, Result};
use crate::logging::OperationTimer;
use crate::matcher::RuleMatcher;
use crate::metrics::MetricsCollector;
use crate::models::{
    AllocationMethod, Company, CompanyEmailPattern, EmailMessage, NewPattern, PatternPatch, PatternType,
};
use crate::validation::InputValidator;

/// Result of an automatic allocation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AllocationOutcome {
    /// The message already had a company; nothing changed
    AlreadyAllocated { company_id: i64 },
    /// A rule matched and the message now belongs to `company`
    Allocated {
        company: Company,
        pattern_id: i64,
        step: PatternType,
    },
    /// No enabled rule applied
    Unmatched,
}

impl AllocationOutcome {
    /// Company the message belongs to after the call
    #[must_use]
    pub const fn company_id(&self) -> Option<i64> {
        match self {
            Self::AlreadyAllocated { company_id } => Some(*company_id),
            Self::Allocated { company, .. } => Some(company.id),
            Self::Unmatched => None,
        }
    }

    /// True only when this call assigned a company
    #[must_use]
    pub const fn newly_allocated(&self) -> bool {
        matches!(self, Self::Allocated { .. })
    }
}

/// Totals from a reallocation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReallocationSummary {
    /// Messages that have a company once the pass is done
    pub reallocated: usize,
    /// Automatic allocations cleared before the pass
    pub cleared: usize,
    /// Messages that keep a company assigned by hand
    pub kept_manual: usize,
    /// Messages whose allocation failed and were skipped
    pub failed: usize,
}

/// Orchestrates automatic and manual allocation on top of the store
#[derive(Debug, Clone)]
pub struct AllocationService {
    db: Database,
    matcher: RuleMatcher,
    metrics: MetricsCollector,
}

impl AllocationService {
    pub fn new(db: Database) -> Self {
        Self::with_metrics(db, MetricsCollector::default())
    }

    pub fn with_metrics(db: Database, metrics: MetricsCollector) -> Self {
        let matcher = RuleMatcher::new(db.clone());
        Self { db, matcher, metrics }
    }

    fn require_message(&self, message_id: i64) -> Result<EmailMessage> {
        self.db
            .get_message(message_id)?
            .ok_or_else(|| AllocatorError::not_found("message", message_id))
    }

    fn require_company(&self, company_id: i64) -> Result<Company> {
        self.db
            .get_company(company_id)?
            .ok_or_else(|| AllocatorError::not_found("company", company_id))
    }

    fn require_pattern(&self, pattern_id: i64) -> Result<CompanyEmailPattern> {
        self.db
            .get_pattern(pattern_id)?
            .ok_or_else(|| AllocatorError::not_found("pattern", pattern_id))
    }

    /// Run the matcher for a message that has no company yet.
    ///
    /// A message that already has a company is returned unchanged.
    pub fn allocate(&self, message_id: i64) -> Result<AllocationOutcome> {
        let message = self.require_message(message_id)?;
        self.allocate_message(&message)
    }

    fn allocate_message(&self, message: &EmailMessage) -> Result<AllocationOutcome> {
        if let Some(company_id) = message.company_id {
            debug!(message_id = message.id, company_id, "Message already allocated");
            return Ok(AllocationOutcome::AlreadyAllocated { company_id });
        }

        let Some(outcome) = self.matcher.match_message(message)? else {
            self.metrics.record_unmatched();
            return Ok(AllocationOutcome::Unmatched);
        };

        self.db.set_message_allocation(
            message.id,
            Some(outcome.company.id),
            Some(AllocationMethod::Auto),
            Some(Utc::now()),
        )?;
        self.metrics.record_allocation(AllocationMethod::Auto);
        info!(
            message_id = message.id,
            company_id = outcome.company.id,
            step = outcome.step.as_str(),
            "Message allocated"
        );

        Ok(AllocationOutcome::Allocated {
            company: outcome.company,
            pattern_id: outcome.pattern.id,
            step: outcome.step,
        })
    }

    /// Assign a message to a company by hand
    pub fn manually_allocate(&self, message_id: i64, company_id: i64) -> Result<EmailMessage> {
        self.require_message(message_id)?;
        self.require_company(company_id)?;

        self.db.set_message_allocation(
            message_id,
            Some(company_id),
            Some(AllocationMethod::Manual),
            Some(Utc::now()),
        )?;
        self.metrics.record_allocation(AllocationMethod::Manual);
        info!(message_id, company_id, "Message allocated manually");

        self.require_message(message_id)
    }

    /// Detach a message from its company.
    ///
    /// The method becomes `manual` so a later reallocation pass leaves it alone.
    pub fn unallocate(&self, message_id: i64) -> Result<EmailMessage> {
        self.require_message(message_id)?;

        self.db
            .set_message_allocation(message_id, None, Some(AllocationMethod::Manual), None)?;
        self.metrics.record_unallocation();
        info!(message_id, "Message unallocated");

        self.require_message(message_id)
    }

    /// Rules of a company, highest priority first
    pub fn get_patterns(&self, company_id: i64) -> Result<Vec<CompanyEmailPattern>> {
        self.require_company(company_id)?;
        self.db.list_patterns_by_company(company_id)
    }

    /// Add a rule to a company after validating and normalizing its value
    pub fn add_pattern(&self, company_id: i64, new_pattern: NewPattern) -> Result<CompanyEmailPattern> {
        self.require_company(company_id)?;

        let pattern_value = InputValidator::normalize_pattern_value(new_pattern.pattern_type, &new_pattern.pattern_value)?;
        let pattern = self.db.create_pattern(
            company_id,
            &NewPattern {
                pattern_value,
                ..new_pattern
            },
        )?;

        info!(
            company_id,
            pattern_id = pattern.id,
            pattern_type = pattern.pattern_type.as_str(),
            "Pattern added"
        );
        Ok(pattern)
    }

    /// Change a rule. A new type or value is validated against the resulting rule.
    pub fn update_pattern(&self, pattern_id: i64, patch: PatternPatch) -> Result<CompanyEmailPattern> {
        let current = self.require_pattern(pattern_id)?;

        let patch = if patch.pattern_type.is_some() || patch.pattern_value.is_some() {
            let pattern_type = patch.pattern_type.unwrap_or(current.pattern_type);
            let raw_value = patch.pattern_value.as_deref().unwrap_or(&current.pattern_value);
            let pattern_value = InputValidator::normalize_pattern_value(pattern_type, raw_value)?;
            PatternPatch {
                pattern_type: Some(pattern_type),
                pattern_value: Some(pattern_value),
                ..patch
            }
        } else {
            patch
        };

        let updated = self.db.update_pattern(pattern_id, &patch)?;
        debug!(pattern_id, "Pattern updated");
        Ok(updated)
    }

    pub fn set_pattern_enabled(&self, pattern_id: i64, enabled: bool) -> Result<CompanyEmailPattern> {
        let updated = self.db.set_pattern_enabled(pattern_id, enabled)?;
        info!(pattern_id, enabled, "Pattern toggled");
        Ok(updated)
    }

    /// Delete a rule; fails with `NotFound` for an unknown id
    pub fn remove_pattern(&self, pattern_id: i64) -> Result<()> {
        self.db.delete_pattern(pattern_id)?;
        info!(pattern_id, "Pattern removed");
        Ok(())
    }

    /// Re-run the matcher over every message of an account.
    ///
    /// Automatic allocations are cleared first, then every message without a
    /// company goes through the matcher again. Companies assigned by hand or by
    /// the classifier are kept. Each message is allocated independently; a
    /// failure is logged and the pass continues.
    pub fn reallocate_all_emails(&self, account_id: i64) -> Result<ReallocationSummary> {
        let timer = OperationTimer::new("reallocate_all_emails");

        if self.db.get_account(account_id)?.is_none() {
            return Err(AllocatorError::not_found("account", account_id));
        }

        let mut summary = ReallocationSummary {
            cleared: self.db.clear_auto_allocations(account_id)?,
            ..ReallocationSummary::default()
        };

        for message in self.db.list_all_messages_by_account(account_id)? {
            match self.allocate_message(&message) {
                Ok(outcome) => {
                    if matches!(outcome, AllocationOutcome::AlreadyAllocated { .. })
                        && message.allocation_method == Some(AllocationMethod::Manual)
                    {
                        summary.kept_manual += 1;
                    }
                    if outcome.company_id().is_some() {
                        summary.reallocated += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    self.metrics.record_error(e.kind().as_str(), "reallocate");
                    warn!(message_id = message.id, error = %e, "Failed to reallocate message");
                }
            }
        }

        self.metrics.record_reallocation(timer.elapsed());
        timer.finish();
        info!(
            account_id,
            reallocated = summary.reallocated,
            cleared = summary.cleared,
            kept_manual = summary.kept_manual,
            failed = summary.failed,
            "Reallocation finished"
        );

        Ok(summary)
    }
}
