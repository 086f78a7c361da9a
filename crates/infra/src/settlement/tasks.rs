//! The three tasks of a settlement run.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use cardrecon_codec::{Decoder, DetailRecord, PartnerLayout, encode};
use cardrecon_core::{CreditStatus, Partner, RedeemedDealId, ResultCode};
use cardrecon_orchestration::{ExecutionResult, OrchestratedTask};

use super::SettlementServices;
use super::collaborators::{PartnerClient, PartnerFileSink};
use super::run::SettlementRun;
use crate::invocation::InvocationError;
use crate::reconcile::DEFINITIVE_RESULTS;
use crate::store::{OutstandingRecord, StoreError};

pub(crate) type SharedRun = Arc<Mutex<SettlementRun>>;

/// Records still waiting for a statement credit request to reach the partner.
fn awaiting_credit_request(status: CreditStatus) -> bool {
    matches!(
        status,
        CreditStatus::ClearingReceived
            | CreditStatus::SendingStatementCreditRequest
            | CreditStatus::StatementCreditFailed
    )
}

fn store_fault(partner: Partner, task: &str, err: &StoreError) -> ExecutionResult {
    warn!(%partner, task, error = %err, "deal store call failed; retrying next run");
    ExecutionResult::NonTerminalError
}

/// Load the partner's records awaiting a credit request and mark them as
/// being sent.
fn claim_pending(
    services: &SettlementServices,
    partner: Partner,
    task: &str,
) -> Result<Vec<OutstandingRecord>, ExecutionResult> {
    let pending: Vec<OutstandingRecord> = services
        .store
        .retrieve_outstanding_records(partner)
        .map_err(|e| store_fault(partner, task, &e))?
        .into_iter()
        .filter(|r| awaiting_credit_request(r.credit_status))
        .collect();

    let to_mark: Vec<RedeemedDealId> = pending
        .iter()
        .filter(|r| r.credit_status != CreditStatus::SendingStatementCreditRequest)
        .map(|r| r.redeemed_deal_id)
        .collect();
    if !to_mark.is_empty() {
        services
            .store
            .update_credit_status(&to_mark, CreditStatus::SendingStatementCreditRequest)
            .map_err(|e| store_fault(partner, task, &e))?;
    }

    Ok(pending
        .into_iter()
        .map(|mut r| {
            r.credit_status = CreditStatus::SendingStatementCreditRequest;
            r
        })
        .collect())
}

/// Pull pending response files and reconcile them.
pub struct ResponseFileTask {
    pub(crate) partner: Partner,
    pub(crate) services: SettlementServices,
    pub(crate) run: SharedRun,
}

#[async_trait]
impl OrchestratedTask for ResponseFileTask {
    fn name(&self) -> &str {
        "response_file"
    }

    async fn execute(&self) -> ExecutionResult {
        let partner = self.partner;
        let layout = PartnerLayout::for_partner(partner);
        let decoder = Decoder::new(&layout).skip_malformed(self.services.skip_malformed);

        loop {
            let file = match self.services.source.next_response_file(partner) {
                Ok(Some(file)) => file,
                Ok(None) => return ExecutionResult::Success,
                Err(e) => {
                    warn!(%partner, error = %e, "could not read response file; retrying next run");
                    return ExecutionResult::NonTerminalError;
                }
            };

            let batch = match decoder.decode(Some(file.reader)) {
                Ok(batch) => batch,
                Err(e) => {
                    error!(%partner, file = %file.name, error = %e, "response file rejected");
                    return ExecutionResult::TerminalError;
                }
            };

            let report = match self.services.reconciler.reconcile_batch(partner, &batch) {
                Ok(report) => report,
                Err(e) => return store_fault(partner, self.name(), &e),
            };

            if let Err(e) = self.services.source.acknowledge(partner, &file.name) {
                warn!(%partner, file = %file.name, error = %e, "could not acknowledge response file");
                return ExecutionResult::NonTerminalError;
            }
            info!(%partner, file = %file.name, matched = report.matched, "response file processed");
            self.run.lock().unwrap().reports.push(report);
        }
    }
}

/// Request statement credits one record at a time through the partner API.
pub struct StatementCreditTask {
    pub(crate) partner: Partner,
    pub(crate) client: Arc<dyn PartnerClient>,
    pub(crate) services: SettlementServices,
    pub(crate) run: SharedRun,
}

#[async_trait]
impl OrchestratedTask for StatementCreditTask {
    fn name(&self) -> &str {
        "statement_credit"
    }

    async fn execute(&self) -> ExecutionResult {
        let partner = self.partner;
        let pending = match claim_pending(&self.services, partner, self.name()) {
            Ok(pending) => pending,
            Err(result) => return result,
        };
        if pending.is_empty() {
            debug!(%partner, "no statement credits to request");
            return ExecutionResult::Success;
        }

        let mut results = Vec::with_capacity(pending.len());
        let mut requested = 0;
        let policy = self
            .services
            .retry_policy
            .clone()
            .with_terminal_codes(DEFINITIVE_RESULTS);
        let table = self.services.reconciler.error_table();

        for record in &pending {
            let client = &self.client;
            let call = move || async move {
                match client.request_statement_credit(record).await {
                    Err(err) => match err.code.as_deref().and_then(|code| table.resolve(partner, code)) {
                        Some(outcome) => {
                            debug!(
                                %partner,
                                transaction_id = %record.partner_transaction_id,
                                partner_code = err.code.as_deref().unwrap_or_default(),
                                result = %outcome,
                                "partner error code mapped to a result"
                            );
                            Ok(outcome)
                        }
                        None => Err(err),
                    },
                    answer => answer,
                }
            };
            let code = match self.services.engine.invoke(call, &policy).await {
                Ok(code) => code,
                Err(InvocationError::Exhausted { attempts, source }) => {
                    warn!(
                        %partner,
                        transaction_id = %record.partner_transaction_id,
                        attempts,
                        error = %source,
                        "statement credit request failed"
                    );
                    results.push(ExecutionResult::NonTerminalError);
                    ResultCode::UnknownError
                }
                Err(InvocationError::Cancelled { .. }) => {
                    // Unsent records stay in SendingStatementCreditRequest and
                    // are picked up by the next run.
                    warn!(%partner, "statement credit requests interrupted by shutdown");
                    self.run.lock().unwrap().credits_requested += requested;
                    return ExecutionResult::NonTerminalError;
                }
            };

            match self.services.reconciler.apply_result(record, code) {
                Ok(CreditStatus::StatementCreditFailed) => {
                    results.push(ExecutionResult::NonTerminalError);
                }
                Ok(_) => requested += 1,
                Err(e) => results.push(store_fault(partner, self.name(), &e)),
            }
        }

        info!(%partner, requested, total = pending.len(), "statement credit requests sent");
        self.run.lock().unwrap().credits_requested += requested;
        ExecutionResult::aggregate_all(results)
    }
}

/// Request statement credits in one batch file.
pub struct SettlementFileTask {
    pub(crate) partner: Partner,
    pub(crate) sink: Arc<dyn PartnerFileSink>,
    pub(crate) services: SettlementServices,
    pub(crate) run: SharedRun,
}

#[async_trait]
impl OrchestratedTask for SettlementFileTask {
    fn name(&self) -> &str {
        "settlement_file"
    }

    async fn execute(&self) -> ExecutionResult {
        let partner = self.partner;
        let pending = match claim_pending(&self.services, partner, self.name()) {
            Ok(pending) => pending,
            Err(result) => return result,
        };
        if pending.is_empty() {
            debug!(%partner, "no records for a settlement file");
            return ExecutionResult::Success;
        }

        let now = Utc::now();
        let sequence_number = self.run.lock().unwrap().next_sequence_number();
        let details: Vec<DetailRecord> = pending.iter().map(OutstandingRecord::to_detail_record).collect();
        let contents = match encode(&PartnerLayout::for_partner(partner), &details, sequence_number, now) {
            Ok(contents) => contents,
            Err(e) => {
                error!(%partner, error = %e, "could not encode settlement file");
                return ExecutionResult::TerminalError;
            }
        };

        let file_name = format!("{}_{}_{:06}.txt", partner.code(), now.format("%Y%m%d"), sequence_number);
        if let Err(e) = self.sink.deliver(partner, &file_name, &contents) {
            warn!(%partner, file = %file_name, error = %e, "settlement file delivery failed; retrying next run");
            return ExecutionResult::NonTerminalError;
        }
        {
            let mut run = self.run.lock().unwrap();
            run.sequence_number = sequence_number;
            run.delivered_files.push(file_name.clone());
            run.credits_requested += pending.len();
        }

        let ids: Vec<RedeemedDealId> = pending.iter().map(|r| r.redeemed_deal_id).collect();
        if let Err(e) = self
            .services
            .store
            .update_credit_status(&ids, CreditStatus::StatementCreditRequested)
        {
            return store_fault(partner, self.name(), &e);
        }

        info!(%partner, file = %file_name, records = ids.len(), sequence_number, "settlement file delivered");
        ExecutionResult::Success
    }
}
