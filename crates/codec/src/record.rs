//! Typed records of a partner batch file.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Record kind selected by the first character of a line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Header,
    Detail,
    Trailer,
}

impl RecordKind {
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'H' => Some(RecordKind::Header),
            'D' => Some(RecordKind::Detail),
            'T' => Some(RecordKind::Trailer),
            _ => None,
        }
    }

    pub fn tag(&self) -> char {
        match self {
            RecordKind::Header => 'H',
            RecordKind::Detail => 'D',
            RecordKind::Trailer => 'T',
        }
    }
}

/// Batch metadata from the `H` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub date: NaiveDate,
    pub sequence_number: u32,
    pub partner_code: Option<String>,
}

/// Batch totals from the `T` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trailer {
    pub partner_code: Option<String>,
    pub declared_count: u64,
}

/// One transaction line.
///
/// Only `transaction_id` is present in every partner's layout; the other
/// fields are filled when the partner's columns carry them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailRecord {
    pub transaction_id: String,
    pub partner_code: Option<String>,
    pub offer_id: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub card_token: Option<String>,
    pub merchant_id: Option<String>,
    pub partner_reference: Option<String>,
    pub response_code: Option<String>,
}

impl DetailRecord {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            ..Default::default()
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.transaction_date = Some(date);
        self
    }

    pub fn with_offer(mut self, offer_id: impl Into<String>) -> Self {
        self.offer_id = Some(offer_id.into());
        self
    }

    pub fn with_card(mut self, card_token: impl Into<String>) -> Self {
        self.card_token = Some(card_token.into());
        self
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = Some(code.into());
        self
    }
}

/// Non-fatal findings of a decode pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// The trailer's declared count differs from the detail lines decoded.
    CountMismatch { declared: u64, found: usize },
    /// A detail line dropped because it did not parse (lenient decoders only).
    MalformedRecord { line_number: usize, reason: String },
}

impl core::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeWarning::CountMismatch { declared, found } => {
                write!(f, "declared {declared}, found {found}")
            }
            DecodeWarning::MalformedRecord { line_number, reason } => {
                write!(f, "skipped line {line_number}: {reason}")
            }
        }
    }
}

/// A decoded partner file: header, details in file order, trailer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchFile {
    pub header: Option<Header>,
    pub details: Vec<DetailRecord>,
    pub trailer: Option<Trailer>,
    pub warnings: Vec<DecodeWarning>,
}

impl BatchFile {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.details.is_empty() && self.trailer.is_none()
    }

    /// `(declared, found)` when the trailer count disagrees with the details.
    pub fn count_mismatch(&self) -> Option<(u64, usize)> {
        let trailer = self.trailer.as_ref()?;
        (trailer.declared_count != self.details.len() as u64)
            .then_some((trailer.declared_count, self.details.len()))
    }
}
