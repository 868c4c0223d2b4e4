//! Asynchronous CSV reader with batch interface
//!
//! Provides batch reading over operation records for the async strategy.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of OperationRecords
//!                  ↓
//!           csv_format module
//!           (OperationCsvRecord, convert_csv_record)
//! ```

use crate::io::csv_format::{convert_csv_record, OperationCsvRecord};
use crate::types::OperationRecord;
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

/// Asynchronous CSV reader
///
/// Provides batch reading interface over operation records.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self { csv_reader }
    }

    /// Read a batch of operation records
    ///
    /// Reads up to `batch_size` records. Invalid records are logged and
    /// skipped, so a batch may be shorter than requested before end of file.
    ///
    /// # Returns
    ///
    /// The converted records; empty once the end of the file is reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<OperationRecord> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<OperationCsvRecord>();

        while batch.len() < batch_size {
            match records.next().await {
                Some(Ok(csv_record)) => match convert_csv_record(csv_record) {
                    Ok(record) => batch.push(record),
                    Err(e) => warn!(error = %e, "Skipping invalid operation record"),
                },
                Some(Err(e)) => warn!(error = %e, "Skipping unparsable CSV row"),
                None => break,
            }
        }

        batch
    }
}
