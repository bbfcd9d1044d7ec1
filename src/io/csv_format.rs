//! CSV format handling for ledger scripts and reports
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserializing script rows
//! - Conversion from CSV records to [`LedgerCommand`]s
//! - Card balance and statement output serialization
//!
//! All functions are pure (no file I/O) for easy testing.

use std::io::Write;
use std::str::FromStr;

use csv::Writer;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{
    AdjustmentKind, CardId, CardSummary, LedgerError, MerchantId, StatementLine, TxnId,
};

/// CSV record structure for deserialization
///
/// Matches the script format with columns: type, card, merchant, txn, amount, text.
/// Every column but `type` is optional since each command uses a different subset.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct CsvRecord {
    #[serde(rename = "type")]
    pub command: String,
    #[serde(default)]
    pub card: Option<CardId>,
    #[serde(default)]
    pub merchant: Option<MerchantId>,
    #[serde(default)]
    pub txn: Option<TxnId>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// One replayable ledger operation
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// `card,,,,,<name>`
    CreateCard { name: String },

    /// `merchant,,,,,<name>`; the name doubles as the merchant's token
    CreateMerchant { name: String },

    /// `load,<card>,,,<amount>,`
    Load { card: CardId, amount: Decimal },

    /// `authorize,<card>,<merchant>,,<amount>,<text>`
    Authorize {
        merchant: MerchantId,
        card: CardId,
        amount: Decimal,
        text: String,
    },

    /// `capture|reverse|refund,,,<txn>,<amount>,`
    Adjust {
        kind: AdjustmentKind,
        txn: TxnId,
        amount: Decimal,
    },
}

impl LedgerCommand {
    /// Lowercase command name as written in scripts
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCommand::CreateCard { .. } => "card",
            LedgerCommand::CreateMerchant { .. } => "merchant",
            LedgerCommand::Load { .. } => "load",
            LedgerCommand::Authorize { .. } => "authorize",
            LedgerCommand::Adjust { kind, .. } => kind.as_str(),
        }
    }
}

fn required<T>(value: Option<T>, column: &str, command: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("{} command requires a {} column", command, column))
}

/// Parse an amount column; sign and scale are left for the engine to judge
fn parse_amount(amount: Option<String>, command: &str) -> Result<Decimal, String> {
    match amount {
        Some(amount_str) if !amount_str.trim().is_empty() => Decimal::from_str(amount_str.trim())
            .map_err(|_| format!("Invalid amount '{}' for {} command", amount_str, command)),
        _ => Err(format!("{} command requires an amount", command)),
    }
}

/// Convert a CsvRecord to a LedgerCommand
///
/// This function:
/// - Parses the command type (case-insensitive)
/// - Checks that the columns the command needs are present
/// - Parses the amount into a Decimal where the command takes one
///
/// # Arguments
///
/// * `csv_record` - The deserialized CSV record
///
/// # Returns
///
/// * `Ok(LedgerCommand)` - Successfully converted command
/// * `Err(String)` - Error message describing the conversion failure
pub fn convert_csv_record(csv_record: CsvRecord) -> Result<LedgerCommand, String> {
    let command = csv_record.command.to_lowercase();
    let text = csv_record.text.unwrap_or_default();

    match command.as_str() {
        "card" | "merchant" => {
            let name = text.trim().to_string();
            if name.is_empty() {
                return Err(format!("{} command requires a name in the text column", command));
            }
            if command == "card" {
                Ok(LedgerCommand::CreateCard { name })
            } else {
                Ok(LedgerCommand::CreateMerchant { name })
            }
        }
        "load" => Ok(LedgerCommand::Load {
            card: required(csv_record.card, "card", &command)?,
            amount: parse_amount(csv_record.amount, &command)?,
        }),
        "authorize" => Ok(LedgerCommand::Authorize {
            merchant: required(csv_record.merchant, "merchant", &command)?,
            card: required(csv_record.card, "card", &command)?,
            amount: parse_amount(csv_record.amount, &command)?,
            text,
        }),
        "capture" | "reverse" | "refund" => {
            let kind = match command.as_str() {
                "capture" => AdjustmentKind::Capture,
                "reverse" => AdjustmentKind::Reverse,
                _ => AdjustmentKind::Refund,
            };
            Ok(LedgerCommand::Adjust {
                kind,
                txn: required(csv_record.txn, "txn", &command)?,
                amount: parse_amount(csv_record.amount, &command)?,
            })
        }
        _ => Err(format!("Invalid command type: '{}'", csv_record.command)),
    }
}

/// Write card balances to CSV format
///
/// Writes cards with columns: card, name, available, blocked.
/// Cards are sorted by card ID for deterministic output.
///
/// # Arguments
///
/// * `cards` - Slice of card summaries to write
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(LedgerError)` if a write error occurred
pub fn write_cards_csv(cards: &[CardSummary], output: &mut dyn Write) -> Result<(), LedgerError> {
    let mut writer = Writer::from_writer(output);
    writer.write_record(["card", "name", "available", "blocked"])?;

    let mut sorted_cards = cards.to_vec();
    sorted_cards.sort_by_key(|card| card.card_id);

    for card in sorted_cards {
        writer.write_record(&[
            card.card_id.to_string(),
            card.name,
            format!("{:.2}", card.available_balance),
            format!("{:.2}", card.blocked_amount),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write a card statement to CSV format
///
/// Columns: Date, Text, Location, Amount. Dates are `YYYY-MM-DD` and amounts
/// carry two decimals. Lines are written in the order given.
pub fn write_statement_csv(
    lines: &[StatementLine],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = Writer::from_writer(output);
    writer.write_record(["Date", "Text", "Location", "Amount"])?;

    for line in lines {
        writer.write_record(&[
            line.date.format("%Y-%m-%d").to_string(),
            line.text.clone(),
            line.location.clone(),
            format!("{:.2}", line.amount),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn record(command: &str) -> CsvRecord {
        CsvRecord {
            command: command.to_string(),
            ..CsvRecord::default()
        }
    }

    #[rstest]
    #[case::card(
        CsvRecord { text: Some("Alice".into()), ..record("card") },
        LedgerCommand::CreateCard { name: "Alice".into() }
    )]
    #[case::merchant_upper(
        CsvRecord { text: Some(" Cafe ".into()), ..record("MERCHANT") },
        LedgerCommand::CreateMerchant { name: "Cafe".into() }
    )]
    #[case::load(
        CsvRecord { card: Some(1), amount: Some("100.00".into()), ..record("load") },
        LedgerCommand::Load { card: 1, amount: Decimal::new(10000, 2) }
    )]
    #[case::authorize(
        CsvRecord {
            card: Some(1),
            merchant: Some(2),
            amount: Some("40".into()),
            text: Some("coffee".into()),
            ..record("authorize")
        },
        LedgerCommand::Authorize { merchant: 2, card: 1, amount: Decimal::new(40, 0), text: "coffee".into() }
    )]
    #[case::capture(
        CsvRecord { txn: Some(3), amount: Some("1.5".into()), ..record("capture") },
        LedgerCommand::Adjust { kind: AdjustmentKind::Capture, txn: 3, amount: Decimal::new(15, 1) }
    )]
    #[case::refund(
        CsvRecord { txn: Some(3), amount: Some("2".into()), ..record("Refund") },
        LedgerCommand::Adjust { kind: AdjustmentKind::Refund, txn: 3, amount: Decimal::new(2, 0) }
    )]
    fn test_convert_csv_record_valid(#[case] csv_record: CsvRecord, #[case] expected: LedgerCommand) {
        assert_eq!(convert_csv_record(csv_record), Ok(expected));
    }

    #[rstest]
    #[case::invalid_type(record("deposit"), "Invalid command type")]
    #[case::card_without_name(record("card"), "requires a name")]
    #[case::load_without_card(
        CsvRecord { amount: Some("1".into()), ..record("load") },
        "requires a card column"
    )]
    #[case::load_without_amount(CsvRecord { card: Some(1), ..record("load") }, "requires an amount")]
    #[case::whitespace_amount(
        CsvRecord { card: Some(1), amount: Some("  ".into()), ..record("load") },
        "requires an amount"
    )]
    #[case::authorize_without_merchant(
        CsvRecord { card: Some(1), amount: Some("1".into()), ..record("authorize") },
        "requires a merchant column"
    )]
    #[case::reverse_without_txn(
        CsvRecord { amount: Some("1".into()), ..record("reverse") },
        "requires a txn column"
    )]
    #[case::unparsable_amount(
        CsvRecord { txn: Some(1), amount: Some("ten".into()), ..record("capture") },
        "Invalid amount"
    )]
    fn test_convert_csv_record_errors(#[case] csv_record: CsvRecord, #[case] expected_error: &str) {
        let result = convert_csv_record(csv_record);
        assert!(result.is_err());
        assert!(
            result.as_ref().unwrap_err().contains(expected_error),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_non_positive_amounts_are_left_to_the_engine() {
        let csv_record = CsvRecord {
            card: Some(1),
            amount: Some("-5".into()),
            ..record("load")
        };
        assert_eq!(
            convert_csv_record(csv_record),
            Ok(LedgerCommand::Load {
                card: 1,
                amount: Decimal::new(-5, 0)
            })
        );
    }

    fn summary(card_id: CardId, name: &str, available: Decimal, blocked: Decimal) -> CardSummary {
        CardSummary {
            card_id,
            name: name.to_string(),
            available_balance: available,
            blocked_amount: blocked,
        }
    }

    #[rstest]
    #[case::empty(vec![], "card,name,available,blocked\n")]
    #[case::two_decimals(
        vec![summary(1, "Alice", Decimal::new(60, 0), Decimal::new(40, 0))],
        "card,name,available,blocked\n1,Alice,60.00,40.00\n"
    )]
    #[case::sorted_by_card_id(
        vec![
            summary(2, "Bob", Decimal::new(125, 1), Decimal::ZERO),
            summary(1, "Alice", Decimal::ZERO, Decimal::ZERO),
        ],
        "card,name,available,blocked\n1,Alice,0.00,0.00\n2,Bob,12.50,0.00\n"
    )]
    #[case::quoted_name(
        vec![summary(1, "Doe, Jane", Decimal::ONE, Decimal::ZERO)],
        "card,name,available,blocked\n1,\"Doe, Jane\",1.00,0.00\n"
    )]
    fn test_write_cards_csv(#[case] cards: Vec<CardSummary>, #[case] expected_output: &str) {
        let mut output = Vec::new();
        write_cards_csv(&cards, &mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), expected_output);
    }

    #[test]
    fn test_write_statement_csv() {
        let lines = vec![
            StatementLine {
                date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
                text: "coffee".into(),
                location: "Cafe".into(),
                amount: Decimal::new(4, 0),
            },
            StatementLine {
                date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                text: String::new(),
                location: String::new(),
                amount: Decimal::new(1234, 2),
            },
        ];

        let mut output = Vec::new();
        write_statement_csv(&lines, &mut output).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Date,Text,Location,Amount\n2024-03-09,coffee,Cafe,4.00\n2024-03-10,,,12.34\n"
        );
    }
}
