//! Asynchronous CSV reader with batch interface
//!
//! Provides a streaming interface over ledger script rows from a CSV source.
//!
//! # Design
//!
//! The AsyncReader uses:
//! - csv-async for streaming CSV parsing
//! - Batch reading so the caller can interleave cancellation checks
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of LedgerCommands
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

use crate::io::csv_format::{convert_csv_record, CsvRecord, LedgerCommand};

/// Asynchronous CSV reader
///
/// Maintains streaming behavior with constant memory usage. Rows that fail to
/// parse or convert are logged, counted and skipped.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    skipped: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a new AsyncReader from an async reader
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            skipped: 0,
        }
    }

    /// Read a batch of commands
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Maximum number of commands to return
    ///
    /// # Returns
    ///
    /// Up to `batch_size` successfully converted commands, in file order.
    /// Returns an empty vector at end of input.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<LedgerCommand> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut skipped = 0;
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            match records.next().await {
                Some(Ok(csv_record)) => match convert_csv_record(csv_record) {
                    Ok(command) => batch.push(command),
                    Err(e) => {
                        warn!(error = %e, "skipping script row");
                        skipped += 1;
                    }
                },
                Some(Err(e)) => {
                    warn!(error = %e, "skipping malformed CSV row");
                    skipped += 1;
                }
                None => break,
            }
        }

        self.skipped += skipped;
        batch
    }

    /// Rows skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use rust_decimal::Decimal;

    const HEADER: &str = "type,card,merchant,txn,amount,text\n";

    fn reader(rows: &str) -> AsyncReader<Cursor<Vec<u8>>> {
        AsyncReader::new(Cursor::new(format!("{}{}", HEADER, rows).into_bytes()))
    }

    #[tokio::test]
    async fn test_read_batch_in_order() {
        let mut async_reader = reader(
            "card,,,,,Alice\n\
             merchant,,,,,Cafe\n\
             load,1,,,100,\n",
        );

        let batch = async_reader.read_batch(2).await;
        assert_eq!(
            batch,
            vec![
                LedgerCommand::CreateCard {
                    name: "Alice".into()
                },
                LedgerCommand::CreateMerchant {
                    name: "Cafe".into()
                },
            ]
        );

        let batch = async_reader.read_batch(2).await;
        assert_eq!(
            batch,
            vec![LedgerCommand::Load {
                card: 1,
                amount: Decimal::new(100, 0)
            }]
        );

        assert!(async_reader.read_batch(2).await.is_empty());
        assert_eq!(async_reader.skipped(), 0);
    }

    #[tokio::test]
    async fn test_empty_script() {
        let mut async_reader = reader("");
        assert!(async_reader.read_batch(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped_and_counted() {
        let mut async_reader = reader(
            "deposit,1,,,100,\n\
             load,notanumber,,,5,\n\
             load,1,,,5,\n",
        );

        let batch = async_reader.read_batch(10).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(async_reader.skipped(), 2);
    }

    #[tokio::test]
    async fn test_short_rows_and_whitespace() {
        let mut async_reader = reader("  capture ,  ,  , 7 , 2.50\n");

        let batch = async_reader.read_batch(10).await;
        assert_eq!(
            batch,
            vec![LedgerCommand::Adjust {
                kind: crate::types::AdjustmentKind::Capture,
                txn: 7,
                amount: Decimal::new(250, 2)
            }]
        );
    }
}
