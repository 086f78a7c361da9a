//! Credit-status reconciliation.
//!
//! Applies partner outcomes (response files or real-time call results) to
//! outstanding redeemed deals:
//!
//! - statuses only move forward; terminal records are never touched
//! - a transaction id seen twice in one pass is applied once
//! - rewards are written through the store, which rejects duplicates

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use cardrecon_codec::{BatchFile, DetailRecord};
use cardrecon_core::{CreditStatus, Partner, RedeemedDealId, ResultCode};

use crate::partner_errors::PartnerErrorTable;
use crate::store::{DealStore, OutstandingRecord, ReconciledRecord, StoreError};

/// Credit status a partner outcome leads to.
pub fn status_for_result(code: ResultCode) -> CreditStatus {
    match code {
        ResultCode::Success | ResultCode::Created | ResultCode::DuplicateTransaction => {
            CreditStatus::CreditGranted
        }
        ResultCode::JobQueued => CreditStatus::StatementCreditRequested,
        ResultCode::PartnerRejected
        | ResultCode::InvalidParameter
        | ResultCode::TransactionNotFound
        | ResultCode::Unauthorized => CreditStatus::RejectedByPartner,
        ResultCode::UnknownError | ResultCode::PartnerUnavailable | ResultCode::Timeout => {
            CreditStatus::StatementCreditFailed
        }
    }
}

/// Partner answers that settle a statement credit request either way;
/// resending the request cannot change them.
pub const DEFINITIVE_RESULTS: [ResultCode; 8] = [
    ResultCode::Success,
    ResultCode::Created,
    ResultCode::DuplicateTransaction,
    ResultCode::JobQueued,
    ResultCode::PartnerRejected,
    ResultCode::InvalidParameter,
    ResultCode::TransactionNotFound,
    ResultCode::Unauthorized,
];

/// Outcome counters of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Detail records read from the file.
    pub processed: usize,
    pub matched: usize,
    /// Transaction ids with no outstanding record.
    pub unmatched: Vec<String>,
    /// Repeats of a transaction id within the same file.
    pub duplicates_in_batch: usize,
    pub cleared: usize,
    pub granted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub requested: usize,
    /// Rewards newly written to the store.
    pub rewarded: usize,
    /// Grants whose reward the store already had.
    pub already_rewarded: usize,
    /// Outcomes that would not move the record forward.
    pub ignored: usize,
    /// `(declared, found)` from the trailer check.
    pub count_mismatch: Option<(u64, usize)>,
}

impl ReconciliationReport {
    fn record_transition(&mut self, status: CreditStatus) {
        match status {
            CreditStatus::ClearingReceived => self.cleared += 1,
            CreditStatus::CreditGranted => self.granted += 1,
            CreditStatus::RejectedByPartner => self.rejected += 1,
            CreditStatus::StatementCreditFailed => self.failed += 1,
            CreditStatus::StatementCreditRequested => self.requested += 1,
            CreditStatus::AuthorizationReceived | CreditStatus::SendingStatementCreditRequest => {}
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn DealStore>,
    errors: Arc<PartnerErrorTable>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DealStore>, errors: Arc<PartnerErrorTable>) -> Self {
        Self { store, errors }
    }

    pub fn error_table(&self) -> &PartnerErrorTable {
        &self.errors
    }

    /// Reconcile a decoded partner file against the partner's outstanding
    /// records, in file order.
    ///
    /// Details without a response code confirm clearing; the others carry
    /// the partner's verdict on a statement credit request.
    pub fn reconcile_batch(
        &self,
        partner: Partner,
        batch: &BatchFile,
    ) -> Result<ReconciliationReport, StoreError> {
        let mut report = ReconciliationReport::default();

        if let Some((declared, found)) = batch.count_mismatch() {
            warn!(%partner, declared, found, "trailer count does not match detail records; reconciling anyway");
            report.count_mismatch = Some((declared, found));
        }
        if batch.details.is_empty() {
            debug!(%partner, "no detail records to reconcile");
            return Ok(report);
        }

        let mut outstanding: HashMap<String, OutstandingRecord> = self
            .store
            .retrieve_outstanding_records(partner)?
            .into_iter()
            .map(|r| (r.partner_transaction_id.clone(), r))
            .collect();
        let mut seen = HashSet::new();
        let mut updates: Vec<(CreditStatus, Vec<RedeemedDealId>)> = Vec::new();

        for detail in &batch.details {
            report.processed += 1;
            if !seen.insert(detail.transaction_id.as_str()) {
                debug!(%partner, transaction_id = %detail.transaction_id, "transaction repeated in file; skipping");
                report.duplicates_in_batch += 1;
                continue;
            }
            let Some(record) = outstanding.get_mut(&detail.transaction_id) else {
                warn!(%partner, transaction_id = %detail.transaction_id, "no outstanding record for partner transaction");
                report.unmatched.push(detail.transaction_id.clone());
                continue;
            };
            report.matched += 1;

            let outcome = self.outcome_for(partner, detail);
            if let Some(status) = self.advance(record, outcome, &mut report)? {
                match updates.iter_mut().find(|(s, _)| *s == status) {
                    Some((_, ids)) => ids.push(record.redeemed_deal_id),
                    None => updates.push((status, vec![record.redeemed_deal_id])),
                }
            }
        }

        for (status, ids) in &updates {
            self.store.update_credit_status(ids, *status)?;
        }

        info!(
            %partner,
            processed = report.processed,
            matched = report.matched,
            unmatched = report.unmatched.len(),
            granted = report.granted,
            rejected = report.rejected,
            failed = report.failed,
            rewarded = report.rewarded,
            "reconciled partner file"
        );
        Ok(report)
    }

    /// Apply the result of a real-time statement credit call to one record.
    ///
    /// Returns the record's status afterwards.
    pub fn apply_result(
        &self,
        record: &OutstandingRecord,
        code: ResultCode,
    ) -> Result<CreditStatus, StoreError> {
        let mut record = record.clone();
        let mut report = ReconciliationReport::default();

        match self.advance(&mut record, Some(code), &mut report)? {
            Some(status) => {
                self.store.update_credit_status(&[record.redeemed_deal_id], status)?;
                debug!(
                    partner = %record.partner,
                    transaction_id = %record.partner_transaction_id,
                    result = %code,
                    ?status,
                    "applied partner result"
                );
                Ok(status)
            }
            None => Ok(record.credit_status),
        }
    }

    /// `None` for a clearing confirmation.
    fn outcome_for(&self, partner: Partner, detail: &DetailRecord) -> Option<ResultCode> {
        detail
            .response_code
            .as_deref()
            .map(|code| self.errors.classify(partner, code))
    }

    /// Move `record` towards the status `outcome` implies.
    ///
    /// Returns the new status, or `None` when the record stays where it is.
    fn advance(
        &self,
        record: &mut OutstandingRecord,
        outcome: Option<ResultCode>,
        report: &mut ReconciliationReport,
    ) -> Result<Option<CreditStatus>, StoreError> {
        let target = outcome.map_or(CreditStatus::ClearingReceived, status_for_result);
        let current = record.credit_status;

        if !current.can_advance_to(target) {
            debug!(
                partner = %record.partner,
                transaction_id = %record.partner_transaction_id,
                ?current,
                ?target,
                "outcome does not move record forward; ignoring"
            );
            report.ignored += 1;
            return Ok(None);
        }

        if target == CreditStatus::CreditGranted {
            let outcome = outcome.unwrap_or(ResultCode::Success);
            let reward = ReconciledRecord::from_outstanding(record, outcome);
            match self.store.add_reconciled_record(&reward)? {
                ResultCode::DuplicateTransaction => {
                    debug!(
                        partner = %record.partner,
                        transaction_id = %record.partner_transaction_id,
                        "reward already recorded"
                    );
                    report.already_rewarded += 1;
                }
                _ => report.rewarded += 1,
            }
        }

        record.credit_status = target;
        report.record_transition(target);
        Ok(Some(target))
    }
}
