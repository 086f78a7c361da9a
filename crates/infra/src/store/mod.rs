//! Data access for redeemed deals.
//!
//! The pipeline never talks to a database directly: everything goes through
//! the [`DealStore`] collaborator. Calls are synchronous; callers map any
//! [`StoreError`] to a retryable job failure.

mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cardrecon_codec::DetailRecord;
use cardrecon_core::{CreditStatus, Partner, RedeemedDealId, ResultCode};

pub use in_memory::InMemoryDealStore;

/// A redeemed deal whose credit status is not yet final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingRecord {
    pub redeemed_deal_id: RedeemedDealId,
    pub partner: Partner,
    /// Transaction id the partner uses in its files and responses.
    pub partner_transaction_id: String,
    pub offer_id: Option<String>,
    pub card_token: Option<String>,
    pub merchant_id: Option<String>,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    /// Statement credit owed to the cardholder once granted.
    pub reward_amount: Decimal,
    pub credit_status: CreditStatus,
}

impl OutstandingRecord {
    /// Detail line sent to the partner to request the statement credit.
    pub fn to_detail_record(&self) -> DetailRecord {
        DetailRecord {
            transaction_id: self.partner_transaction_id.clone(),
            partner_code: Some(self.partner.code().to_string()),
            offer_id: self.offer_id.clone(),
            transaction_date: Some(self.transaction_date),
            amount: Some(self.reward_amount),
            card_token: self.card_token.clone(),
            merchant_id: self.merchant_id.clone(),
            partner_reference: Some(self.redeemed_deal_id.to_string()),
            response_code: None,
        }
    }
}

/// A granted reward, written once per partner transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub redeemed_deal_id: RedeemedDealId,
    pub partner: Partner,
    pub partner_transaction_id: String,
    pub reward_amount: Decimal,
    pub outcome: ResultCode,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciledRecord {
    pub fn from_outstanding(record: &OutstandingRecord, outcome: ResultCode) -> Self {
        Self {
            redeemed_deal_id: record.redeemed_deal_id,
            partner: record.partner,
            partner_transaction_id: record.partner_transaction_id.clone(),
            reward_amount: record.reward_amount,
            outcome,
            reconciled_at: Utc::now(),
        }
    }
}

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("redeemed deal not found: {0}")]
    NotFound(RedeemedDealId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Data-access collaborator.
pub trait DealStore: Send + Sync {
    /// Records of `partner` that are not in a terminal credit status.
    fn retrieve_outstanding_records(
        &self,
        partner: Partner,
    ) -> Result<Vec<OutstandingRecord>, StoreError>;

    /// Set the credit status of every listed deal.
    fn update_credit_status(
        &self,
        ids: &[RedeemedDealId],
        status: CreditStatus,
    ) -> Result<(), StoreError>;

    /// Persist a granted reward.
    ///
    /// Answers `DuplicateTransaction` when the partner transaction was
    /// already rewarded; nothing is written in that case.
    fn add_reconciled_record(&self, record: &ReconciledRecord) -> Result<ResultCode, StoreError>;
}

impl<T: DealStore + ?Sized> DealStore for Arc<T> {
    fn retrieve_outstanding_records(
        &self,
        partner: Partner,
    ) -> Result<Vec<OutstandingRecord>, StoreError> {
        (**self).retrieve_outstanding_records(partner)
    }

    fn update_credit_status(
        &self,
        ids: &[RedeemedDealId],
        status: CreditStatus,
    ) -> Result<(), StoreError> {
        (**self).update_credit_status(ids, status)
    }

    fn add_reconciled_record(&self, record: &ReconciledRecord) -> Result<ResultCode, StoreError> {
        (**self).add_reconciled_record(record)
    }
}
