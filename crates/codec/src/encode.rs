//! Batch file encoder.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{CodecError, CodecResult};
use crate::layout::{AmountFormat, ColumnSpec, Encoding, Field, PartnerLayout};
use crate::record::{DetailRecord, RecordKind};

/// Encode detail records into a complete partner file.
///
/// The header carries `timestamp`'s date and `sequence_number`; the trailer
/// declares `records.len()`. Lines are joined with `\n` and the file has no
/// trailing newline.
pub fn encode(
    layout: &PartnerLayout,
    records: &[DetailRecord],
    sequence_number: u32,
    timestamp: DateTime<Utc>,
) -> CodecResult<String> {
    if records.is_empty() {
        return Err(CodecError::EmptyInput);
    }
    layout.validate()?;

    let batch_date = timestamp.date_naive().format(layout.output_date_format).to_string();
    let partner_code = layout.partner.code().to_string();
    let mut lines = Vec::with_capacity(records.len() + 2);

    lines.push(render(layout, &layout.header, RecordKind::Header, 1, |field| match field {
        Field::BatchDate => Some(batch_date.clone()),
        Field::SequenceNumber => Some(sequence_number.to_string()),
        Field::PartnerCode => Some(partner_code.clone()),
        _ => None,
    })?);

    for (idx, record) in records.iter().enumerate() {
        lines.push(render(layout, &layout.detail, RecordKind::Detail, idx + 2, |field| {
            detail_value(layout, record, field)
        })?);
    }

    let count = records.len().to_string();
    lines.push(render(layout, &layout.trailer, RecordKind::Trailer, records.len() + 2, |field| {
        match field {
            Field::RecordCount => Some(count.clone()),
            Field::PartnerCode => Some(partner_code.clone()),
            _ => None,
        }
    })?);

    Ok(lines.join("\n"))
}

fn detail_value(layout: &PartnerLayout, record: &DetailRecord, field: Field) -> Option<String> {
    match field {
        Field::TransactionId => Some(record.transaction_id.clone()),
        Field::PartnerCode => Some(
            record
                .partner_code
                .clone()
                .unwrap_or_else(|| layout.partner.code().to_string()),
        ),
        Field::OfferId => record.offer_id.clone(),
        Field::TransactionDate => record
            .transaction_date
            .map(|d| d.format(layout.output_date_format).to_string()),
        Field::Amount => record.amount.map(|a| format_amount(layout.amount, a)),
        Field::CardToken => record.card_token.clone(),
        Field::MerchantId => record.merchant_id.clone(),
        Field::PartnerReference => record.partner_reference.clone(),
        Field::ResponseCode => record.response_code.clone(),
        _ => None,
    }
}

/// Render an amount in the partner's unit, rounded to the partner's scale.
pub fn format_amount(format: AmountFormat, amount: Decimal) -> String {
    let mut value = amount.round_dp(format.scale());
    value.rescale(format.scale());
    match format {
        AmountFormat::Major { .. } => value.to_string(),
        AmountFormat::Minor { .. } => value.mantissa().to_string(),
    }
}

fn render<F>(
    layout: &PartnerLayout,
    columns: &[ColumnSpec],
    kind: RecordKind,
    line_number: usize,
    value: F,
) -> CodecResult<String>
where
    F: Fn(Field) -> Option<String>,
{
    let mut cells = Vec::with_capacity(columns.len());

    for column in columns {
        let cell = match column.field {
            Field::Tag => kind.tag().to_string(),
            Field::Filler => " ".repeat(column.width.unwrap_or(0)),
            field => {
                let raw = sanitize(layout.encoding, value(field).unwrap_or_default());
                fit(layout.encoding, column, &raw).ok_or_else(|| CodecError::InvalidField {
                    line_number,
                    field: field.name(),
                    value: raw.clone(),
                })?
            }
        };
        cells.push(cell);
    }

    Ok(match layout.encoding {
        Encoding::Delimited(delimiter) => cells.join(delimiter.to_string().as_str()),
        Encoding::FixedWidth => cells.concat(),
    })
}

/// The delimiter is reserved; it never appears inside a column.
fn sanitize(encoding: Encoding, value: String) -> String {
    match encoding {
        Encoding::Delimited(delimiter) if value.contains(delimiter) => value.replace(delimiter, " "),
        _ => value,
    }
}

/// Apply the column width.
///
/// Text is truncated (and blank-padded when fixed width); numbers are
/// zero-padded and never truncated, so an overflowing number yields `None`.
fn fit(encoding: Encoding, column: &ColumnSpec, value: &str) -> Option<String> {
    let Some(width) = column.width else {
        return Some(value.to_string());
    };
    let numeric = column.field.is_numeric() || column.field == Field::Amount;

    match (encoding, numeric) {
        (Encoding::FixedWidth, true) => pad_numeric(value, width),
        (Encoding::Delimited(_), true) => Some(value.to_string()),
        (Encoding::FixedWidth, false) => {
            let truncated: String = value.chars().take(width).collect();
            Some(format!("{truncated:<width$}"))
        }
        (Encoding::Delimited(_), false) => Some(value.chars().take(width).collect()),
    }
}

fn pad_numeric(value: &str, width: usize) -> Option<String> {
    if value.chars().count() > width {
        return None;
    }
    Some(match value.strip_prefix('-') {
        Some(digits) => format!("-{digits:0>w$}", w = width - 1),
        None => format!("{value:0>width$}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;
    use crate::record::DecodeWarning;
    use cardrecon_core::Partner;
    use chrono::{NaiveDate, TimeZone};
    use proptest::prelude::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 10, 30, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    fn sample_record() -> DetailRecord {
        DetailRecord::new("T100")
            .with_offer("O9")
            .with_date(date())
            .with_amount(Decimal::new(125, 1))
            .with_card("CARD1")
            .with_merchant("M1")
    }

    #[test]
    fn encodes_partner_a_file() {
        let layout = PartnerLayout::for_partner(Partner::A);
        let file = encode(&layout, &[sample_record()], 7, ts()).unwrap();
        assert_eq!(
            file,
            "H|01/05/2024|7|PNA\nD|PNA|T100|O9|01/05/2024|12.50|CARD1|M1\nT|PNA|1"
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        let layout = PartnerLayout::for_partner(Partner::A);
        assert!(matches!(encode(&layout, &[], 1, ts()), Err(CodecError::EmptyInput)));
    }

    #[test]
    fn filler_columns_are_always_emitted() {
        let layout = PartnerLayout::for_partner(Partner::C);
        let record = DetailRecord::new("T1").with_amount(Decimal::new(5, 0));
        let file = encode(&layout, &[record], 3, ts()).unwrap();
        let detail = file.lines().nth(1).unwrap();
        assert_eq!(detail, format!("D,T1,,5.00,,{}", " ".repeat(10)));
    }

    #[test]
    fn fixed_width_lines_have_exact_length() {
        let layout = PartnerLayout::for_partner(Partner::B);
        let file = encode(&layout, &[sample_record().with_response_code("00")], 12, ts()).unwrap();
        let lines: Vec<&str> = file.lines().collect();

        assert_eq!(lines[0].len(), PartnerLayout::fixed_len(&layout.header));
        assert_eq!(lines[1].len(), PartnerLayout::fixed_len(&layout.detail));
        assert_eq!(lines[2].len(), PartnerLayout::fixed_len(&layout.trailer));
        assert!(lines[1].contains("000000001250"));
        assert!(lines[1].starts_with(&format!("DT100{}01/05/2024", " ".repeat(20))));
    }

    #[test]
    fn long_text_is_truncated_not_rejected() {
        let layout = PartnerLayout::for_partner(Partner::A);
        let long_id = "X".repeat(50);
        let file = encode(&layout, &[DetailRecord::new(long_id)], 1, ts()).unwrap();
        let batch = Decoder::new(&layout).decode_str(&file).unwrap();
        assert_eq!(batch.details[0].transaction_id, "X".repeat(32));
    }

    #[test]
    fn delimiter_inside_text_is_blanked() {
        let layout = PartnerLayout::for_partner(Partner::A);
        let record = DetailRecord::new("T1").with_merchant("ACME|EAST");
        let file = encode(&layout, &[record], 1, ts()).unwrap();
        let batch = Decoder::new(&layout).decode_str(&file).unwrap();
        assert_eq!(batch.details[0].merchant_id.as_deref(), Some("ACME EAST"));
    }

    #[test]
    fn overflowing_number_is_an_error() {
        let layout = PartnerLayout::for_partner(Partner::B);
        let record = DetailRecord::new("T1").with_amount(Decimal::new(1_000_000_000_000, 0));
        let err = encode(&layout, &[record], 1, ts()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "amount", line_number: 2, .. }));
    }

    #[test]
    fn amounts_round_to_partner_scale() {
        assert_eq!(format_amount(AmountFormat::Major { scale: 2 }, Decimal::new(12345, 3)), "12.35");
        assert_eq!(format_amount(AmountFormat::Minor { scale: 2 }, Decimal::new(5, 0)), "500");
        assert_eq!(pad_numeric("-125", 6).as_deref(), Some("-00125"));
    }

    fn record_strategy() -> impl Strategy<Value = DetailRecord> {
        ("[A-Z0-9]{1,20}", 0i64..10_000_000, 0u32..3650).prop_map(|(id, cents, days)| {
            DetailRecord::new(id)
                .with_amount(Decimal::new(cents, 2))
                .with_date(date() + chrono::Days::new(days as u64))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: whatever is encoded decodes to the same number of details
        /// and a trailer declaring exactly that number.
        #[test]
        fn encode_then_decode_preserves_counts(
            partner_idx in 0usize..4,
            records in prop::collection::vec(record_strategy(), 1..40),
            sequence in 0u32..100_000,
        ) {
            let layout = PartnerLayout::for_partner(Partner::ALL[partner_idx]);
            let file = encode(&layout, &records, sequence, ts()).unwrap();
            let batch = Decoder::new(&layout).decode_str(&file).unwrap();

            prop_assert_eq!(batch.details.len(), records.len());
            prop_assert_eq!(batch.trailer.unwrap().declared_count, records.len() as u64);
            prop_assert_eq!(batch.header.unwrap().sequence_number, sequence);
            let mismatch = batch
                .warnings
                .iter()
                .any(|w| matches!(w, DecodeWarning::CountMismatch { .. }));
            prop_assert!(!mismatch);
            for (decoded, original) in batch.details.iter().zip(&records) {
                prop_assert_eq!(&decoded.transaction_id, &original.transaction_id);
                prop_assert_eq!(decoded.amount.map(|a| a.round_dp(2)), original.amount);
            }
        }
    }
}
