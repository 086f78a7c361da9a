//! Typed state of one settlement run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use cardrecon_core::{DomainError, DomainResult, Partner};
use cardrecon_orchestration::ScheduledJobDetails;

use crate::reconcile::ReconciliationReport;

pub const PAYLOAD_PARTNER: &str = "partner";
pub const PAYLOAD_LAST_SUCCESSFUL_RUN: &str = "last_successful_run";
pub const PAYLOAD_SEQUENCE_NUMBER: &str = "sequence_number";

/// Largest batch sequence number; fixed-width headers hold six digits.
pub const MAX_SEQUENCE_NUMBER: u32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRun {
    pub partner: Partner,
    pub last_successful_run: Option<DateTime<Utc>>,
    /// Sequence number of the last file delivered to the partner.
    pub sequence_number: u32,
    pub started_at: DateTime<Utc>,
    pub reports: Vec<ReconciliationReport>,
    pub credits_requested: usize,
    pub delivered_files: Vec<String>,
}

impl SettlementRun {
    pub fn new(partner: Partner) -> Self {
        Self {
            partner,
            last_successful_run: None,
            sequence_number: 0,
            started_at: Utc::now(),
            reports: Vec::new(),
            credits_requested: 0,
            delivered_files: Vec::new(),
        }
    }

    /// Parse the scheduler payload.
    ///
    /// `partner` is required; a missing sequence number starts at zero.
    pub fn from_details(details: &ScheduledJobDetails) -> DomainResult<Self> {
        let partner = details
            .payload_value(PAYLOAD_PARTNER)
            .ok_or_else(|| DomainError::validation("settlement payload has no partner"))?
            .parse::<Partner>()?;

        let last_successful_run = details
            .payload_value(PAYLOAD_LAST_SUCCESSFUL_RUN)
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| DomainError::validation(format!("bad {PAYLOAD_LAST_SUCCESSFUL_RUN} {raw:?}: {e}")))
            })
            .transpose()?;

        let sequence_number = details
            .payload_value(PAYLOAD_SEQUENCE_NUMBER)
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| DomainError::validation(format!("bad {PAYLOAD_SEQUENCE_NUMBER} {raw:?}")))
            })
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            last_successful_run,
            sequence_number,
            ..Self::new(partner)
        })
    }

    /// Sequence number for the next delivered file.
    pub fn next_sequence_number(&self) -> u32 {
        if self.sequence_number >= MAX_SEQUENCE_NUMBER {
            1
        } else {
            self.sequence_number + 1
        }
    }

    /// Payload the next run resumes from.
    ///
    /// The sequence number is always carried forward; the last successful
    /// run only moves when this run succeeded.
    pub fn to_payload(&self, succeeded: bool) -> BTreeMap<String, String> {
        let mut payload = BTreeMap::new();
        payload.insert(PAYLOAD_PARTNER.to_string(), self.partner.code().to_string());
        payload.insert(PAYLOAD_SEQUENCE_NUMBER.to_string(), self.sequence_number.to_string());

        let last = if succeeded {
            Some(self.started_at)
        } else {
            self.last_successful_run
        };
        if let Some(last) = last {
            payload.insert(PAYLOAD_LAST_SUCCESSFUL_RUN.to_string(), last.to_rfc3339());
        }
        payload
    }
}
