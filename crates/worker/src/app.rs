//! Runtime wiring for the settlement worker.
//!
//! The deal store, partner clients and file exchange are the in-memory
//! collaborators; a deployment swaps them for real ones through the same
//! traits.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use cardrecon_core::{JobId, Partner, ResultCode};
use cardrecon_infra::jobs::{InMemoryScheduledJobStore, JobExecutor, JobExecutorHandle, ScheduledJob, ScheduledJobStore};
use cardrecon_infra::settlement::{
    self, InMemoryFileExchange, PartnerChannel, PartnerClient, PartnerFileSink, PartnerFileSource,
    PartnerSettlementJob, ScriptedPartnerClient, SettlementServices,
};
use cardrecon_infra::{
    DealStore, InMemoryDealStore, InvocationEngine, Reconciler, SettlementConfig, ShutdownSignal,
};
use cardrecon_orchestration::{OrchestratedJob, ScheduledJobDetails};

pub struct SettlementApp {
    pub deals: Arc<InMemoryDealStore>,
    pub files: Arc<InMemoryFileExchange>,
    pub executor: JobExecutor<InMemoryScheduledJobStore>,
    signal: ShutdownSignal,
}

impl SettlementApp {
    /// Wire the collaborators. Retry waits in flight end when `signal` fires.
    pub fn build(config: &SettlementConfig, signal: ShutdownSignal) -> anyhow::Result<Self> {
        let table = config
            .load_partner_error_table()
            .context("loading partner error table")?;
        let benign = config
            .load_benign_failures()
            .context("loading benign partner failures")?;

        let deals = Arc::new(InMemoryDealStore::new());
        let files = Arc::new(InMemoryFileExchange::new());
        let store: Arc<dyn DealStore> = deals.clone();
        let client: Arc<dyn PartnerClient> = Arc::new(ScriptedPartnerClient::new(ResultCode::Success));

        let channels: HashMap<Partner, PartnerChannel> = config
            .partners
            .iter()
            .map(|&partner| {
                let channel = if config.real_time_partners.contains(&partner) {
                    PartnerChannel::RealTime(client.clone())
                } else {
                    PartnerChannel::BatchFile(files.clone() as Arc<dyn PartnerFileSink>)
                };
                (partner, channel)
            })
            .collect();

        let services = SettlementServices {
            store: store.clone(),
            reconciler: Arc::new(Reconciler::new(store, Arc::new(table))),
            engine: InvocationEngine::new()
                .with_shutdown(signal.subscribe())
                .with_benign_failures(benign),
            retry_policy: config.retry_policy(),
            source: files.clone() as Arc<dyn PartnerFileSource>,
            channels,
            skip_malformed: config.skip_malformed_records,
        };

        let mut executor = JobExecutor::new(Arc::new(InMemoryScheduledJobStore::new()));
        executor.register_factory(settlement::JOB_TYPE, move || {
            Box::new(PartnerSettlementJob::new(services.clone())) as Box<dyn OrchestratedJob>
        });

        Ok(Self {
            deals,
            files,
            executor,
            signal,
        })
    }

    /// Enqueue one settlement job per configured partner.
    pub fn schedule_partners(&self, config: &SettlementConfig) -> anyhow::Result<Vec<JobId>> {
        config
            .partners
            .iter()
            .map(|partner| {
                let details = ScheduledJobDetails::new(settlement::JOB_TYPE)
                    .with_payload(settlement::run::PAYLOAD_PARTNER, partner.code());
                let job = ScheduledJob::new(details, config.job_interval)
                    .with_retry_interval(config.retry_interval);
                let id = self
                    .executor
                    .store()
                    .enqueue(job)
                    .with_context(|| format!("scheduling settlement for {partner}"))?;
                info!(%partner, job_id = %id, interval_secs = config.job_interval.as_secs(), "scheduled settlement job");
                Ok(id)
            })
            .collect()
    }

    pub fn start(self, config: &SettlementConfig) -> JobExecutorHandle {
        self.executor.spawn(config.executor_config(), self.signal)
    }
}
