//! Per-partner settlement jobs.
//!
//! One [`PartnerSettlementJob`] run per partner and schedule tick:
//!
//! 1. reconcile pending response files
//! 2. request statement credits for cleared records, through the partner
//!    API or a batch file depending on the partner's [`PartnerChannel`]
//!
//! Run state lives in the scheduler payload (`partner`,
//! `last_successful_run`, `sequence_number`) and is parsed into a typed
//! [`SettlementRun`] at start-up.

pub mod collaborators;
pub mod run;
pub mod tasks;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tracing::{error, info};

use cardrecon_core::Partner;
use cardrecon_orchestration::{
    ExecutionResult, JobScheduler, OrchestratedJob, OrchestratedTask, ScheduledJobDetails,
};

use crate::invocation::{InvocationEngine, RetryPolicy};
use crate::reconcile::Reconciler;
use crate::store::DealStore;

pub use collaborators::{
    DeliveredFile, InMemoryFileExchange, PartnerClient, PartnerFileSink, PartnerFileSource,
    ResponseFile, ScriptedPartnerClient,
};
pub use run::SettlementRun;
pub use tasks::{ResponseFileTask, SettlementFileTask, StatementCreditTask};

use tasks::SharedRun;

/// Job type settlement jobs are registered under.
pub const JOB_TYPE: &str = "partner_settlement";

/// How a partner takes statement credit requests.
#[derive(Clone)]
pub enum PartnerChannel {
    /// One API call per record.
    RealTime(Arc<dyn PartnerClient>),
    /// One batch file per run.
    BatchFile(Arc<dyn PartnerFileSink>),
}

/// Collaborators shared by every settlement job.
#[derive(Clone)]
pub struct SettlementServices {
    pub store: Arc<dyn DealStore>,
    pub reconciler: Arc<Reconciler>,
    pub engine: InvocationEngine,
    pub retry_policy: RetryPolicy,
    pub source: Arc<dyn PartnerFileSource>,
    pub channels: HashMap<Partner, PartnerChannel>,
    /// Drop malformed detail lines instead of rejecting the whole file.
    pub skip_malformed: bool,
}

pub struct PartnerSettlementJob {
    services: SettlementServices,
    details: Option<ScheduledJobDetails>,
    scheduler: Option<Arc<dyn JobScheduler>>,
    run: OnceLock<SharedRun>,
}

impl PartnerSettlementJob {
    pub fn new(services: SettlementServices) -> Self {
        Self {
            services,
            details: None,
            scheduler: None,
            run: OnceLock::new(),
        }
    }

    /// Snapshot of the run state (`None` before a successful start-up).
    pub fn run_state(&self) -> Option<SettlementRun> {
        self.run.get().map(|run| run.lock().unwrap().clone())
    }
}

#[async_trait]
impl OrchestratedJob for PartnerSettlementJob {
    fn name(&self) -> &str {
        JOB_TYPE
    }

    fn initialize(&mut self, details: ScheduledJobDetails, scheduler: Arc<dyn JobScheduler>) {
        self.details = Some(details);
        self.scheduler = Some(scheduler);
    }

    fn tasks(&self) -> Vec<Arc<dyn OrchestratedTask>> {
        let Some(run) = self.run.get() else {
            return Vec::new();
        };
        let partner = run.lock().unwrap().partner;
        let Some(channel) = self.services.channels.get(&partner) else {
            return Vec::new();
        };

        let response: Arc<dyn OrchestratedTask> = Arc::new(ResponseFileTask {
            partner,
            services: self.services.clone(),
            run: run.clone(),
        });
        let credit: Arc<dyn OrchestratedTask> = match channel {
            PartnerChannel::RealTime(client) => Arc::new(StatementCreditTask {
                partner,
                client: client.clone(),
                services: self.services.clone(),
                run: run.clone(),
            }),
            PartnerChannel::BatchFile(sink) => Arc::new(SettlementFileTask {
                partner,
                sink: sink.clone(),
                services: self.services.clone(),
                run: run.clone(),
            }),
        };
        vec![response, credit]
    }

    async fn start_up(&self) -> ExecutionResult {
        let Some(details) = &self.details else {
            error!("settlement job started without initialization");
            return ExecutionResult::TerminalError;
        };

        let run = match SettlementRun::from_details(details) {
            Ok(run) => run,
            Err(e) => {
                error!(job_id = %details.job_id, error = %e, "invalid settlement payload");
                return ExecutionResult::TerminalError;
            }
        };
        if !self.services.channels.contains_key(&run.partner) {
            error!(job_id = %details.job_id, partner = %run.partner, "no statement credit channel configured");
            return ExecutionResult::TerminalError;
        }

        info!(
            job_id = %details.job_id,
            partner = %run.partner,
            sequence_number = run.sequence_number,
            last_successful_run = ?run.last_successful_run,
            "settlement run starting"
        );
        let _ = self.run.set(Arc::new(Mutex::new(run)));
        ExecutionResult::Success
    }

    async fn tear_down(&self, result: ExecutionResult) -> ExecutionResult {
        let (Some(details), Some(scheduler), Some(run)) = (&self.details, &self.scheduler, self.run.get())
        else {
            return result;
        };

        let run = run.lock().unwrap().clone();
        if let Err(e) = scheduler.update_payload(details.job_id, run.to_payload(result.is_success())) {
            error!(job_id = %details.job_id, partner = %run.partner, error = %e, "could not persist settlement state");
            return result.aggregate(ExecutionResult::NonTerminalError);
        }

        info!(
            job_id = %details.job_id,
            partner = %run.partner,
            ?result,
            files_reconciled = run.reports.len(),
            credits_requested = run.credits_requested,
            files_delivered = run.delivered_files.len(),
            "settlement run finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use cardrecon_core::{CreditStatus, JobId, RedeemedDealId, ResultCode};
    use cardrecon_orchestration::{JobOrchestrator, SchedulerError};

    use crate::invocation::{PartnerCallError, Sleeper};
    use crate::partner_errors::PartnerErrorTable;
    use crate::store::{InMemoryDealStore, OutstandingRecord};

    #[derive(Default)]
    struct RecordingScheduler {
        payloads: Mutex<Vec<BTreeMap<String, String>>>,
    }

    impl JobScheduler for RecordingScheduler {
        fn update_payload(
            &self,
            _job_id: JobId,
            payload: BTreeMap<String, String>,
        ) -> Result<(), SchedulerError> {
            self.payloads.lock().unwrap().push(payload);
            Ok(())
        }
    }

    struct NoWait;

    #[async_trait]
    impl Sleeper for NoWait {
        async fn sleep(&self, _delay: Duration) {}
    }

    struct Fixture {
        store: Arc<InMemoryDealStore>,
        files: Arc<InMemoryFileExchange>,
        client: Arc<ScriptedPartnerClient>,
        scheduler: Arc<RecordingScheduler>,
        services: SettlementServices,
    }

    fn fixture(client: ScriptedPartnerClient) -> Fixture {
        let store = Arc::new(InMemoryDealStore::new());
        let files = Arc::new(InMemoryFileExchange::new());
        let client = Arc::new(client);
        let reconciler = Arc::new(Reconciler::new(store.clone(), Arc::new(PartnerErrorTable::built_in())));

        let mut channels = HashMap::new();
        channels.insert(Partner::D, PartnerChannel::BatchFile(files.clone() as Arc<dyn PartnerFileSink>));
        channels.insert(Partner::C, PartnerChannel::RealTime(client.clone() as Arc<dyn PartnerClient>));

        let services = SettlementServices {
            store: store.clone(),
            reconciler,
            engine: InvocationEngine::new().with_sleeper(Arc::new(NoWait)),
            retry_policy: RetryPolicy::new(2, Duration::from_millis(10)),
            source: files.clone(),
            channels,
            skip_malformed: false,
        };
        Fixture {
            store,
            files,
            client,
            scheduler: Arc::new(RecordingScheduler::default()),
            services,
        }
    }

    const CLEARING_D: &str = "H\t2024-01-05\t1\nD\tT1\tO9\t2024-01-05\t12.50\t\tM1\t\nT\t1\tPND";

    fn deal(partner: Partner, txn: &str, status: CreditStatus) -> OutstandingRecord {
        OutstandingRecord {
            redeemed_deal_id: RedeemedDealId::new(),
            partner,
            partner_transaction_id: txn.to_string(),
            offer_id: Some("O9".to_string()),
            card_token: Some("CARD1".to_string()),
            merchant_id: Some("M1".to_string()),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            amount: Decimal::new(1250, 2),
            reward_amount: Decimal::new(250, 2),
            credit_status: status,
        }
    }

    async fn run_job(f: &Fixture, payload: &[(&str, &str)]) -> (ExecutionResult, Option<SettlementRun>) {
        let mut details = ScheduledJobDetails::new(JOB_TYPE);
        for (k, v) in payload {
            details = details.with_payload(*k, *v);
        }
        let mut job = PartnerSettlementJob::new(f.services.clone());
        job.initialize(details, f.scheduler.clone());
        let job = Arc::new(job);
        let result = JobOrchestrator::new().execute(job.clone()).await;
        (result, job.run_state())
    }

    #[tokio::test]
    async fn batch_partner_gets_a_settlement_file() {
        let f = fixture(ScriptedPartnerClient::new(ResultCode::Success));
        let cleared = deal(Partner::D, "T1", CreditStatus::AuthorizationReceived);
        let id = cleared.redeemed_deal_id;
        f.store.insert(cleared);
        f.files.push_response_file(Partner::D, "clearing_1", CLEARING_D);

        let (result, run) = run_job(&f, &[("partner", "PND"), ("sequence_number", "6")]).await;

        assert_eq!(result, ExecutionResult::Success);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::StatementCreditRequested));
        assert_eq!(f.files.pending_response_files(Partner::D), 0);

        let delivered = f.files.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].file_name.starts_with("PND_"));
        assert!(delivered[0].file_name.ends_with("_000007.txt"));
        assert!(delivered[0].contents.starts_with("H\t"));
        assert!(delivered[0].contents.contains("\tT1\tO9\t01/05/2024\t2.50\t"));

        assert_eq!(run.unwrap().sequence_number, 7);
        let payloads = f.scheduler.payloads.lock().unwrap();
        assert_eq!(payloads[0].get("sequence_number").map(String::as_str), Some("7"));
        assert!(payloads[0].contains_key("last_successful_run"));
    }

    #[tokio::test]
    async fn real_time_partner_is_called_per_record() {
        let client = ScriptedPartnerClient::new(ResultCode::Success)
            .with_answer(Err(PartnerCallError::transport(Partner::C, "reset")));
        let f = fixture(client);
        let first = deal(Partner::C, "T1", CreditStatus::ClearingReceived);
        let second = deal(Partner::C, "T2", CreditStatus::StatementCreditFailed);
        let (first_id, second_id) = (first.redeemed_deal_id, second.redeemed_deal_id);
        f.store.insert(first);
        f.store.insert(second);

        let (result, run) = run_job(&f, &[("partner", "PNC")]).await;

        assert_eq!(result, ExecutionResult::Success);
        assert_eq!(f.client.calls().len(), 3);
        assert_eq!(f.store.status_of(first_id), Some(CreditStatus::CreditGranted));
        assert_eq!(f.store.status_of(second_id), Some(CreditStatus::CreditGranted));
        assert_eq!(f.store.reconciled_records().len(), 2);
        assert_eq!(run.unwrap().credits_requested, 2);
    }

    #[tokio::test]
    async fn already_issued_error_code_grants_once_without_resending() {
        let already_issued = || -> Result<ResultCode, PartnerCallError> {
            Err(PartnerCallError::response(Partner::C, 400, Some("AI"), "credit already issued"))
        };
        let client = ScriptedPartnerClient::new(ResultCode::UnknownError)
            .with_answer(already_issued())
            .with_answer(already_issued())
            .with_answer(already_issued());
        let f = fixture(client);
        let record = deal(Partner::C, "T1", CreditStatus::ClearingReceived);
        let id = record.redeemed_deal_id;
        f.store.insert(record);

        let (result, _) = run_job(&f, &[("partner", "PNC")]).await;

        assert_eq!(result, ExecutionResult::Success);
        assert_eq!(f.client.calls().len(), 1);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::CreditGranted));
        let rewards = f.store.reconciled_records();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].outcome, ResultCode::DuplicateTransaction);
    }

    #[tokio::test]
    async fn partner_rejection_is_not_resent() {
        let client = ScriptedPartnerClient::new(ResultCode::Success)
            .with_answer(Err(PartnerCallError::response(Partner::C, 422, Some("R001"), "offer expired")));
        let f = fixture(client);
        let record = deal(Partner::C, "T1", CreditStatus::ClearingReceived);
        let id = record.redeemed_deal_id;
        f.store.insert(record);

        let (result, _) = run_job(&f, &[("partner", "PNC")]).await;

        assert_eq!(result, ExecutionResult::Success);
        assert_eq!(f.client.calls().len(), 1);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::RejectedByPartner));
        assert!(f.store.reconciled_records().is_empty());
    }

    #[tokio::test]
    async fn unmapped_error_code_is_retried() {
        let unmapped = || -> Result<ResultCode, PartnerCallError> {
            Err(PartnerCallError::response(Partner::C, 500, Some("X999"), "internal"))
        };
        let client = ScriptedPartnerClient::new(ResultCode::Success)
            .with_answer(unmapped())
            .with_answer(unmapped())
            .with_answer(unmapped());
        let f = fixture(client);
        let record = deal(Partner::C, "T1", CreditStatus::ClearingReceived);
        let id = record.redeemed_deal_id;
        f.store.insert(record);

        let (result, _) = run_job(&f, &[("partner", "PNC")]).await;

        assert_eq!(result, ExecutionResult::NonTerminalError);
        assert_eq!(f.client.calls().len(), 3);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::StatementCreditFailed));
    }

    #[tokio::test]
    async fn exhausted_partner_call_fails_the_record_and_retries_the_job() {
        let client = ScriptedPartnerClient::new(ResultCode::Success)
            .with_answer(Err(PartnerCallError::transport(Partner::C, "down")))
            .with_answer(Err(PartnerCallError::transport(Partner::C, "down")))
            .with_answer(Err(PartnerCallError::transport(Partner::C, "down")));
        let f = fixture(client);
        let record = deal(Partner::C, "T1", CreditStatus::ClearingReceived);
        let id = record.redeemed_deal_id;
        f.store.insert(record);

        let (result, _) = run_job(&f, &[("partner", "PNC"), ("sequence_number", "2")]).await;

        assert_eq!(result, ExecutionResult::NonTerminalError);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::StatementCreditFailed));
        let payloads = f.scheduler.payloads.lock().unwrap();
        assert_eq!(payloads[0].get("sequence_number").map(String::as_str), Some("2"));
        assert!(!payloads[0].contains_key("last_successful_run"));
    }

    #[tokio::test]
    async fn malformed_response_file_holds_the_job() {
        let f = fixture(ScriptedPartnerClient::new(ResultCode::Success));
        f.files.push_response_file(Partner::D, "bad", "H\t2024-01-05\t1\nD\tT1\nT\t1\tPND");

        let (result, _) = run_job(&f, &[("partner", "PND")]).await;

        assert_eq!(result, ExecutionResult::TerminalError);
        // Left in place for an operator to look at.
        assert_eq!(f.files.pending_response_files(Partner::D), 1);
        assert!(f.files.delivered().is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_retryable() {
        let f = fixture(ScriptedPartnerClient::new(ResultCode::Success));
        f.files.push_response_file(Partner::D, "clearing_1", CLEARING_D);
        f.store.set_unavailable(true);

        let (result, _) = run_job(&f, &[("partner", "PND")]).await;

        assert_eq!(result, ExecutionResult::NonTerminalError);
        assert_eq!(f.files.pending_response_files(Partner::D), 1);
    }

    #[tokio::test]
    async fn failed_delivery_keeps_records_pending() {
        let f = fixture(ScriptedPartnerClient::new(ResultCode::Success));
        let record = deal(Partner::D, "T1", CreditStatus::ClearingReceived);
        let id = record.redeemed_deal_id;
        f.store.insert(record);
        f.files.set_reject_deliveries(true);

        let (result, run) = run_job(&f, &[("partner", "PND"), ("sequence_number", "3")]).await;

        assert_eq!(result, ExecutionResult::NonTerminalError);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::SendingStatementCreditRequest));
        assert_eq!(run.unwrap().sequence_number, 3);

        f.files.set_reject_deliveries(false);
        let (result, _) = run_job(&f, &[("partner", "PND"), ("sequence_number", "3")]).await;
        assert_eq!(result, ExecutionResult::Success);
        assert_eq!(f.store.status_of(id), Some(CreditStatus::StatementCreditRequested));
    }

    #[tokio::test]
    async fn bad_payload_is_terminal_and_nothing_runs() {
        let f = fixture(ScriptedPartnerClient::new(ResultCode::Success));

        let (result, run) = run_job(&f, &[("partner", "nope")]).await;
        assert_eq!(result, ExecutionResult::TerminalError);
        assert!(run.is_none());
        assert!(f.scheduler.payloads.lock().unwrap().is_empty());

        // Partner B has no channel in this fixture.
        let (result, _) = run_job(&f, &[("partner", "PNB")]).await;
        assert_eq!(result, ExecutionResult::TerminalError);
    }
}
