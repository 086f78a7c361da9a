//! In-memory deal store for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;

use cardrecon_core::{CreditStatus, Partner, RedeemedDealId, ResultCode};

use super::{DealStore, OutstandingRecord, ReconciledRecord, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryDealStore {
    deals: RwLock<BTreeMap<RedeemedDealId, OutstandingRecord>>,
    reconciled: RwLock<HashMap<(Partner, String), ReconciledRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: OutstandingRecord) {
        self.deals
            .write()
            .unwrap()
            .insert(record.redeemed_deal_id, record);
    }

    /// Current state of a deal, terminal or not.
    pub fn get(&self, id: RedeemedDealId) -> Option<OutstandingRecord> {
        self.deals.read().unwrap().get(&id).cloned()
    }

    pub fn status_of(&self, id: RedeemedDealId) -> Option<CreditStatus> {
        self.get(id).map(|r| r.credit_status)
    }

    pub fn reconciled_records(&self) -> Vec<ReconciledRecord> {
        let mut records: Vec<_> = self.reconciled.read().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.partner_transaction_id.cmp(&b.partner_transaction_id));
        records
    }

    pub fn reward_total(&self) -> Decimal {
        self.reconciled
            .read()
            .unwrap()
            .values()
            .map(|r| r.reward_amount)
            .sum()
    }

    /// Make every call fail with a storage error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("deal store unavailable".to_string()));
        }
        Ok(())
    }
}

impl DealStore for InMemoryDealStore {
    fn retrieve_outstanding_records(
        &self,
        partner: Partner,
    ) -> Result<Vec<OutstandingRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .deals
            .read()
            .unwrap()
            .values()
            .filter(|r| r.partner == partner && !r.credit_status.is_terminal())
            .cloned()
            .collect())
    }

    fn update_credit_status(
        &self,
        ids: &[RedeemedDealId],
        status: CreditStatus,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut deals = self.deals.write().unwrap();
        if let Some(missing) = ids.iter().find(|id| !deals.contains_key(id)) {
            return Err(StoreError::NotFound(*missing));
        }
        for id in ids {
            if let Some(deal) = deals.get_mut(id) {
                deal.credit_status = status;
            }
        }
        Ok(())
    }

    fn add_reconciled_record(&self, record: &ReconciledRecord) -> Result<ResultCode, StoreError> {
        self.check_available()?;
        let key = (record.partner, record.partner_transaction_id.clone());
        let mut reconciled = self.reconciled.write().unwrap();
        if reconciled.contains_key(&key) {
            return Ok(ResultCode::DuplicateTransaction);
        }
        reconciled.insert(key, record.clone());
        Ok(ResultCode::Created)
    }
}
