//! Partner column layouts.
//!
//! Every partner's file format is one [`PartnerLayout`] value: the record
//! encoding, the ordered columns of each record kind, and the date/amount
//! formats. Adding a partner means adding a table entry here, not a new type.

use cardrecon_core::Partner;

use crate::error::{CodecError, CodecResult};

/// How the columns of a line are separated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Columns joined by a single reserved character.
    Delimited(char),
    /// Columns padded to exact widths and concatenated.
    FixedWidth,
}

/// Typed field a column carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    /// The one-letter record tag.
    Tag,
    PartnerCode,
    TransactionId,
    OfferId,
    TransactionDate,
    Amount,
    CardToken,
    MerchantId,
    PartnerReference,
    ResponseCode,
    BatchDate,
    SequenceNumber,
    RecordCount,
    /// Blank column kept for partner column alignment.
    Filler,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Tag => "record tag",
            Field::PartnerCode => "partner code",
            Field::TransactionId => "transaction id",
            Field::OfferId => "offer id",
            Field::TransactionDate => "transaction date",
            Field::Amount => "amount",
            Field::CardToken => "card token",
            Field::MerchantId => "merchant id",
            Field::PartnerReference => "partner reference",
            Field::ResponseCode => "response code",
            Field::BatchDate => "batch date",
            Field::SequenceNumber => "sequence number",
            Field::RecordCount => "record count",
            Field::Filler => "filler",
        }
    }

    /// Numeric columns are right-aligned and zero-padded in fixed-width files.
    pub(crate) fn is_numeric(&self) -> bool {
        matches!(self, Field::SequenceNumber | Field::RecordCount)
    }
}

/// One column of a record layout.
///
/// `width` is the exact column width for fixed-width layouts and fillers, and
/// the maximum width (longer text is truncated) for delimited text columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: Field,
    pub width: Option<usize>,
}

impl ColumnSpec {
    pub const fn new(field: Field) -> Self {
        Self { field, width: None }
    }

    pub const fn width(field: Field, width: usize) -> Self {
        Self {
            field,
            width: Some(width),
        }
    }

    pub const fn filler(width: usize) -> Self {
        Self::width(Field::Filler, width)
    }
}

/// How monetary amounts are written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AmountFormat {
    /// Major currency units with a fixed number of decimals (`12.50`).
    Major { scale: u32 },
    /// Integer minor units (`1250` for 12.50 at scale 2).
    Minor { scale: u32 },
}

impl AmountFormat {
    pub fn scale(&self) -> u32 {
        match self {
            AmountFormat::Major { scale } | AmountFormat::Minor { scale } => *scale,
        }
    }
}

/// Ingest date format (`yyyy-MM-dd`).
pub const INGEST_DATE_FORMAT: &str = "%Y-%m-%d";
/// Output date format (`MM/dd/yyyy`).
pub const OUTPUT_DATE_FORMAT: &str = "%m/%d/%Y";

/// Complete file layout of one partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerLayout {
    pub partner: Partner,
    pub encoding: Encoding,
    pub header: Vec<ColumnSpec>,
    pub detail: Vec<ColumnSpec>,
    pub trailer: Vec<ColumnSpec>,
    pub ingest_date_format: &'static str,
    pub output_date_format: &'static str,
    pub amount: AmountFormat,
}

impl PartnerLayout {
    /// Built-in layout table entry for a partner.
    pub fn for_partner(partner: Partner) -> Self {
        use ColumnSpec as C;
        use Field::*;

        match partner {
            Partner::A => Self {
                partner,
                encoding: Encoding::Delimited('|'),
                header: vec![C::new(Tag), C::new(BatchDate), C::new(SequenceNumber), C::new(PartnerCode)],
                detail: vec![
                    C::new(Tag),
                    C::width(PartnerCode, 3),
                    C::width(TransactionId, 32),
                    C::width(OfferId, 32),
                    C::new(TransactionDate),
                    C::new(Amount),
                    C::width(CardToken, 20),
                    C::width(MerchantId, 20),
                ],
                trailer: vec![C::new(Tag), C::new(PartnerCode), C::new(RecordCount)],
                ingest_date_format: INGEST_DATE_FORMAT,
                output_date_format: OUTPUT_DATE_FORMAT,
                amount: AmountFormat::Major { scale: 2 },
            },
            Partner::B => Self {
                partner,
                encoding: Encoding::FixedWidth,
                header: vec![
                    C::width(Tag, 1),
                    C::width(BatchDate, 10),
                    C::width(SequenceNumber, 6),
                    C::width(PartnerCode, 3),
                    C::filler(20),
                ],
                detail: vec![
                    C::width(Tag, 1),
                    C::width(TransactionId, 20),
                    C::filler(4),
                    C::width(TransactionDate, 10),
                    C::width(Amount, 12),
                    C::width(CardToken, 16),
                    C::width(MerchantId, 15),
                    C::width(ResponseCode, 3),
                ],
                trailer: vec![
                    C::width(Tag, 1),
                    C::width(PartnerCode, 3),
                    C::width(RecordCount, 9),
                    C::filler(27),
                ],
                ingest_date_format: INGEST_DATE_FORMAT,
                output_date_format: OUTPUT_DATE_FORMAT,
                amount: AmountFormat::Minor { scale: 2 },
            },
            Partner::C => Self {
                partner,
                encoding: Encoding::Delimited(','),
                header: vec![C::new(Tag), C::new(PartnerCode), C::new(BatchDate), C::new(SequenceNumber)],
                detail: vec![
                    C::new(Tag),
                    C::width(TransactionId, 40),
                    C::width(PartnerReference, 40),
                    C::new(Amount),
                    C::width(ResponseCode, 4),
                    C::filler(10),
                ],
                trailer: vec![C::new(Tag), C::new(RecordCount)],
                ingest_date_format: INGEST_DATE_FORMAT,
                output_date_format: OUTPUT_DATE_FORMAT,
                amount: AmountFormat::Major { scale: 2 },
            },
            Partner::D => Self {
                partner,
                encoding: Encoding::Delimited('\t'),
                header: vec![C::new(Tag), C::new(BatchDate), C::new(SequenceNumber)],
                detail: vec![
                    C::new(Tag),
                    C::width(TransactionId, 24),
                    C::width(OfferId, 24),
                    C::new(TransactionDate),
                    C::new(Amount),
                    C::filler(8),
                    C::width(MerchantId, 15),
                    C::width(ResponseCode, 4),
                ],
                trailer: vec![C::new(Tag), C::new(RecordCount), C::new(PartnerCode)],
                ingest_date_format: INGEST_DATE_FORMAT,
                output_date_format: OUTPUT_DATE_FORMAT,
                amount: AmountFormat::Major { scale: 2 },
            },
        }
    }

    /// Check the layout is self-consistent.
    ///
    /// Fixed-width layouts need a width on every column, fillers always need
    /// one, and every record kind must start with its tag column.
    pub fn validate(&self) -> CodecResult<()> {
        let invalid = |reason: String| CodecError::InvalidLayout {
            partner: self.partner.to_string(),
            reason,
        };

        for (kind, columns) in [("header", &self.header), ("detail", &self.detail), ("trailer", &self.trailer)] {
            match columns.first() {
                Some(c) if c.field == Field::Tag => {}
                _ => return Err(invalid(format!("{kind} layout must start with the record tag"))),
            }
            for c in columns {
                if c.field == Field::Filler && c.width.is_none() {
                    return Err(invalid(format!("{kind} filler column without a width")));
                }
                if self.encoding == Encoding::FixedWidth && c.width.is_none() {
                    return Err(invalid(format!("{kind} column {} without a width", c.field.name())));
                }
            }
        }
        if !self.detail.iter().any(|c| c.field == Field::TransactionId) {
            return Err(invalid("detail layout has no transaction id column".to_string()));
        }
        if let Encoding::Delimited(d) = self.encoding {
            if d == '\n' || d == '\r' {
                return Err(invalid("line terminators cannot delimit columns".to_string()));
            }
        }
        Ok(())
    }

    /// Total line length of a fixed-width record kind.
    pub fn fixed_len(columns: &[ColumnSpec]) -> usize {
        columns.iter().map(|c| c.width.unwrap_or(0)).sum()
    }
}
