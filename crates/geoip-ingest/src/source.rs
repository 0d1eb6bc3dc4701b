//! Delimited geo-IP input reader
//!
//! Wraps an async CSV reader configured for the geo-IP export format
//! (`;`-separated, `#` comment lines, no header row) and turns every
//! retained line into a [`RawRecord`].

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use geoip_common::types::RawRecord;
use std::path::Path;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::pipeline::{CancelSignal, Stage};

/// Produces [`RawRecord`]s from a delimited text input
pub struct RecordSource<R> {
    reader: AsyncReader<R>,
    record: StringRecord,
}

impl RecordSource<tokio::fs::File> {
    /// Open a delimited file on disk
    pub async fn open(path: impl AsRef<Path>, delimiter: char, comment: char) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            IngestError::source_read(0, format!("cannot open {}: {}", path.display(), e))
        })?;

        info!(path = %path.display(), "Opened input file");
        Self::from_reader(file, delimiter, comment)
    }
}

impl<R> RecordSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap any async reader
    pub fn from_reader(reader: R, delimiter: char, comment: char) -> Result<Self> {
        let delimiter = ascii_byte(delimiter, "delimiter")?;
        let comment = ascii_byte(comment, "comment marker")?;

        let reader = AsyncReaderBuilder::new()
            .delimiter(delimiter)
            .comment(Some(comment))
            .has_headers(false)
            // Field count is checked per record so the error names the line
            .flexible(true)
            .create_reader(reader);

        Ok(Self {
            reader,
            record: StringRecord::new(),
        })
    }

    /// Read the next record, `None` at end of input
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .await
            .map_err(|e| IngestError::source_read(self.reader.position().line(), e.to_string()))?;

        if !more {
            return Ok(None);
        }

        let line = self
            .record
            .position()
            .map(|p| p.line())
            .unwrap_or_else(|| self.reader.position().line());

        RawRecord::from_fields(self.record.iter())
            .map(Some)
            .map_err(|e| IngestError::from((line, e)))
    }

    /// Emit every record into `tx` until end of input.
    ///
    /// Both the read and the hand-off race the cancel signal, so a full
    /// channel never keeps this stage from unwinding.
    pub async fn produce(
        mut self,
        tx: &mpsc::Sender<RawRecord>,
        cancel: &CancelSignal,
    ) -> Result<u64> {
        let mut emitted = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancel.error()),
                next = self.next_record() => next?,
            };

            let Some(record) = next else {
                break;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancel.error()),
                sent = tx.send(record) => sent.map_err(|_| {
                    IngestError::stage_aborted(Stage::Transform, "record channel closed")
                })?,
            }
            emitted += 1;
        }

        debug!(records = emitted, "Reached end of input");
        Ok(emitted)
    }
}

fn ascii_byte(c: char, what: &str) -> Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(IngestError::config(format!("{} '{}' is not an ASCII character", what, c)))
    }
}
