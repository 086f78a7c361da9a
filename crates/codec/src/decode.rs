//! Streaming decoder for partner batch files.

use std::io::BufRead;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{CodecError, CodecResult};
use crate::layout::{AmountFormat, ColumnSpec, Encoding, Field, PartnerLayout};
use crate::record::{BatchFile, DecodeWarning, DetailRecord, Header, RecordKind, Trailer};

/// Decodes files of one partner layout.
///
/// Strict by default: a detail line with the wrong column count (or a
/// column that fails to parse) fails the whole file. With
/// [`Decoder::skip_malformed`] such lines are dropped one by one and reported
/// as [`DecodeWarning::MalformedRecord`].
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    layout: &'a PartnerLayout,
    skip_malformed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(layout: &'a PartnerLayout) -> Self {
        Self {
            layout,
            skip_malformed: false,
        }
    }

    pub fn skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn layout(&self) -> &PartnerLayout {
        self.layout
    }

    /// Decode a file line by line.
    ///
    /// An absent source is an empty batch, not an error. Lines whose tag is not
    /// `H`, `D` or `T` are skipped.
    pub fn decode<R: BufRead>(&self, source: Option<R>) -> CodecResult<BatchFile> {
        let partner = self.layout.partner;
        let Some(source) = source else {
            debug!(%partner, "no source to decode; returning empty batch");
            return Ok(BatchFile::empty());
        };

        let mut batch = BatchFile::empty();

        for (idx, raw) in source.lines().enumerate() {
            let raw = raw?;
            let line_number = idx + 1;
            let line = raw.strip_suffix('\r').unwrap_or(&raw);

            let Some(kind) = line.chars().next().and_then(RecordKind::from_tag) else {
                debug!(%partner, line_number, "skipping line with unrecognized record tag");
                continue;
            };

            match kind {
                RecordKind::Header => {
                    if batch.header.is_some() {
                        warn!(%partner, line_number, "ignoring repeated header record");
                        continue;
                    }
                    batch.header = Some(self.parse_header(line_number, line)?);
                }
                RecordKind::Detail => match self.parse_detail(line_number, line) {
                    Ok(record) => batch.details.push(record),
                    Err(err) if self.skip_malformed && !matches!(err, CodecError::Io(_)) => {
                        warn!(%partner, line_number, error = %err, "dropping malformed detail record");
                        batch.warnings.push(DecodeWarning::MalformedRecord {
                            line_number,
                            reason: err.to_string(),
                        });
                    }
                    Err(err) => return Err(err),
                },
                RecordKind::Trailer => {
                    if batch.trailer.is_some() {
                        warn!(%partner, line_number, "ignoring repeated trailer record");
                        continue;
                    }
                    batch.trailer = Some(self.parse_trailer(line_number, line)?);
                }
            }
        }

        if let Some((declared, found)) = batch.count_mismatch() {
            warn!(%partner, declared, found, "trailer count mismatch: declared {declared}, found {found}");
            batch
                .warnings
                .push(DecodeWarning::CountMismatch { declared, found });
        }

        debug!(%partner, details = batch.details.len(), "decoded batch file");
        Ok(batch)
    }

    pub fn decode_str(&self, input: &str) -> CodecResult<BatchFile> {
        self.decode(Some(input.as_bytes()))
    }

    fn parse_header(&self, line_number: usize, line: &str) -> CodecResult<Header> {
        let tokens = self.split(&self.layout.header, line_number, line, false)?;
        let mut date = None;
        let mut sequence_number: u32 = 0;
        let mut partner_code = None;

        for (column, token) in self.layout.header.iter().zip(&tokens) {
            match column.field {
                Field::BatchDate => date = Some(self.parse_date(line_number, column.field, token)?),
                Field::SequenceNumber => {
                    sequence_number = token
                        .trim()
                        .parse()
                        .map_err(|_| CodecError::invalid_field(line_number, column.field.name(), token))?;
                }
                Field::PartnerCode => partner_code = non_empty(token),
                _ => {}
            }
        }

        let date = date.ok_or_else(|| CodecError::invalid_field(line_number, Field::BatchDate.name(), ""))?;
        Ok(Header {
            date,
            sequence_number,
            partner_code,
        })
    }

    fn parse_trailer(&self, line_number: usize, line: &str) -> CodecResult<Trailer> {
        let tokens = self.split(&self.layout.trailer, line_number, line, false)?;
        let mut declared_count = None;
        let mut partner_code = None;

        for (column, token) in self.layout.trailer.iter().zip(&tokens) {
            match column.field {
                Field::RecordCount => {
                    let count: u64 = token
                        .trim()
                        .parse()
                        .map_err(|_| CodecError::invalid_field(line_number, column.field.name(), token))?;
                    declared_count = Some(count);
                }
                Field::PartnerCode => partner_code = non_empty(token),
                _ => {}
            }
        }

        let declared_count = declared_count
            .ok_or_else(|| CodecError::invalid_field(line_number, Field::RecordCount.name(), ""))?;
        Ok(Trailer {
            partner_code,
            declared_count,
        })
    }

    fn parse_detail(&self, line_number: usize, line: &str) -> CodecResult<DetailRecord> {
        let tokens = self.split(&self.layout.detail, line_number, line, true)?;
        let mut record = DetailRecord::default();

        for (column, token) in self.layout.detail.iter().zip(&tokens) {
            match column.field {
                Field::TransactionId => {
                    record.transaction_id = non_empty(token)
                        .ok_or_else(|| CodecError::invalid_field(line_number, column.field.name(), token))?;
                }
                Field::PartnerCode => record.partner_code = non_empty(token),
                Field::OfferId => record.offer_id = non_empty(token),
                Field::CardToken => record.card_token = non_empty(token),
                Field::MerchantId => record.merchant_id = non_empty(token),
                Field::PartnerReference => record.partner_reference = non_empty(token),
                Field::ResponseCode => record.response_code = non_empty(token),
                Field::TransactionDate if !token.trim().is_empty() => {
                    record.transaction_date = Some(self.parse_date(line_number, column.field, token)?);
                }
                Field::Amount if !token.trim().is_empty() => {
                    record.amount = Some(self.parse_amount(line_number, token)?);
                }
                _ => {}
            }
        }

        Ok(record)
    }

    /// Split a line into one token per column.
    ///
    /// `strict` requires the exact column count (delimited) or line length
    /// (fixed width); otherwise missing trailing columns read as empty and
    /// extra ones are ignored.
    fn split(
        &self,
        columns: &[ColumnSpec],
        line_number: usize,
        line: &str,
        strict: bool,
    ) -> CodecResult<Vec<String>> {
        match self.layout.encoding {
            Encoding::Delimited(delimiter) => {
                let tokens: Vec<String> = line.split(delimiter).map(str::to_string).collect();
                if strict && tokens.len() != columns.len() {
                    return Err(CodecError::MalformedRecord {
                        line_number,
                        expected: columns.len(),
                        found: tokens.len(),
                        line: line.to_string(),
                    });
                }
                Ok(tokens)
            }
            Encoding::FixedWidth => {
                let chars: Vec<char> = line.chars().collect();
                let expected = PartnerLayout::fixed_len(columns);
                if strict && chars.len() != expected {
                    return Err(CodecError::MalformedRecord {
                        line_number,
                        expected,
                        found: chars.len(),
                        line: line.to_string(),
                    });
                }

                let mut tokens = Vec::with_capacity(columns.len());
                let mut offset = 0;
                for column in columns {
                    let width = column.width.unwrap_or(0);
                    let start = offset.min(chars.len());
                    let end = (offset + width).min(chars.len());
                    tokens.push(chars[start..end].iter().collect());
                    offset += width;
                }
                Ok(tokens)
            }
        }
    }

    fn parse_date(&self, line_number: usize, field: Field, raw: &str) -> CodecResult<NaiveDate> {
        let value = raw.trim();
        NaiveDate::parse_from_str(value, self.layout.ingest_date_format)
            .or_else(|_| NaiveDate::parse_from_str(value, self.layout.output_date_format))
            .map_err(|_| CodecError::invalid_field(line_number, field.name(), raw))
    }

    fn parse_amount(&self, line_number: usize, raw: &str) -> CodecResult<Decimal> {
        let value = raw.trim();
        let invalid = || CodecError::invalid_field(line_number, Field::Amount.name(), raw);
        match self.layout.amount {
            AmountFormat::Major { .. } => Decimal::from_str(value).map_err(|_| invalid()),
            AmountFormat::Minor { scale } => {
                let minor: i128 = value.parse().map_err(|_| invalid())?;
                Decimal::try_from_i128_with_scale(minor, scale).map_err(|_| invalid())
            }
        }
    }
}

fn non_empty(token: &str) -> Option<String> {
    let trimmed = token.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardrecon_core::Partner;
    use rust_decimal::Decimal;

    const SAMPLE: &str = "H|2024-01-05|7|...\nD|P1|T100|O9|2024-01-05|12.50|CARD1|M1\nT|X|2|";

    fn layout(partner: Partner) -> PartnerLayout {
        PartnerLayout::for_partner(partner)
    }

    #[test]
    fn decodes_sample_batch_with_count_warning() {
        let layout = layout(Partner::A);
        let batch = Decoder::new(&layout).decode_str(SAMPLE).unwrap();

        let header = batch.header.as_ref().unwrap();
        assert_eq!(header.date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(header.sequence_number, 7);

        assert_eq!(batch.details.len(), 1);
        let detail = &batch.details[0];
        assert_eq!(detail.transaction_id, "T100");
        assert_eq!(detail.amount, Some(Decimal::new(1250, 2)));
        assert_eq!(detail.offer_id.as_deref(), Some("O9"));
        assert_eq!(detail.card_token.as_deref(), Some("CARD1"));

        assert_eq!(batch.trailer.as_ref().unwrap().declared_count, 2);
        assert_eq!(batch.warnings, vec![DecodeWarning::CountMismatch { declared: 2, found: 1 }]);
        assert_eq!(batch.warnings[0].to_string(), "declared 2, found 1");
    }

    #[test]
    fn absent_source_is_empty_batch() {
        let layout = layout(Partner::A);
        let batch = Decoder::new(&layout).decode::<&[u8]>(None).unwrap();
        assert!(batch.is_empty());
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn unknown_tags_and_blank_lines_are_skipped() {
        let layout = layout(Partner::A);
        let input = "X|comment\n\nH|2024-01-05|1|PNA\r\nD|P1|T1|O1|2024-01-05|1.00|C|M\r\nT|PNA|1\r\n";
        let batch = Decoder::new(&layout).decode_str(input).unwrap();
        assert_eq!(batch.details.len(), 1);
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn wrong_token_count_fails_the_file() {
        let layout = layout(Partner::A);
        let input = "H|2024-01-05|7\nD|P1|T100|O9|2024-01-05|12.50|CARD1\nT|X|1";
        let err = Decoder::new(&layout).decode_str(input).unwrap_err();
        match err {
            CodecError::MalformedRecord {
                line_number,
                expected,
                found,
                line,
            } => {
                assert_eq!(line_number, 2);
                assert_eq!(expected, 8);
                assert_eq!(found, 7);
                assert!(line.contains("T100"));
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn extra_tokens_also_fail_the_file() {
        let layout = layout(Partner::A);
        let input = "D|P1|T100|O9|2024-01-05|12.50|CARD1|M1|extra";
        assert!(matches!(
            Decoder::new(&layout).decode_str(input),
            Err(CodecError::MalformedRecord { found: 9, .. })
        ));
    }

    #[test]
    fn lenient_decoder_drops_only_the_bad_line() {
        let layout = layout(Partner::A);
        let input = "D|P1|T1|O9|2024-01-05|1.00|C|M\nD|P1|T2|short\nD|P1|T3|O9|2024-01-05|oops|C|M\nT|X|3";
        let batch = Decoder::new(&layout).skip_malformed(true).decode_str(input).unwrap();

        assert_eq!(batch.details.len(), 1);
        assert_eq!(batch.details[0].transaction_id, "T1");
        assert!(matches!(batch.warnings[0], DecodeWarning::MalformedRecord { line_number: 2, .. }));
        assert!(matches!(batch.warnings[1], DecodeWarning::MalformedRecord { line_number: 3, .. }));
        assert_eq!(batch.warnings[2], DecodeWarning::CountMismatch { declared: 3, found: 1 });
    }

    #[test]
    fn decodes_fixed_width_minor_units() {
        let layout = layout(Partner::B);
        let detail = format!(
            "D{:<20}{:4}{}{:0>12}{:<16}{:<15}{:<3}",
            "TXN-1", "", "2024-03-09", "1999", "4111XXXX1111", "MERCH-7", "00"
        );
        let input = format!("H2024-03-09000012PNB{:20}\n{detail}\nTPNB000000001{:27}", "", "");
        let batch = Decoder::new(&layout).decode_str(&input).unwrap();

        assert_eq!(batch.header.as_ref().unwrap().sequence_number, 12);
        assert_eq!(batch.details.len(), 1);
        let record = &batch.details[0];
        assert_eq!(record.transaction_id, "TXN-1");
        assert_eq!(record.amount, Some(Decimal::new(1999, 2)));
        assert_eq!(record.merchant_id.as_deref(), Some("MERCH-7"));
        assert_eq!(record.response_code.as_deref(), Some("00"));
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn short_fixed_width_line_is_malformed() {
        let layout = layout(Partner::B);
        let err = Decoder::new(&layout).decode_str("DTXN-1").unwrap_err();
        assert!(matches!(err, CodecError::MalformedRecord { expected: 81, found: 6, .. }));
    }

    #[test]
    fn bad_header_date_is_an_invalid_field() {
        let layout = layout(Partner::A);
        let err = Decoder::new(&layout).decode_str("H|2024-13-45|1|PNA").unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "batch date", line_number: 1, .. }));
    }
}
