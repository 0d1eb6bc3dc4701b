//! Record-to-document transform stage

use geoip_common::types::{Document, RawRecord};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::pipeline::{CancelSignal, Stage};

/// Normalize a raw record into a document keyed by its range identifier
pub fn transform(record: RawRecord) -> Document {
    record.into_document()
}

/// Transform records one at a time until the record channel closes.
///
/// Order is preserved: each record is fully transformed and handed on
/// before the next one is received.
pub async fn transform_records(
    rx: &mut mpsc::Receiver<RawRecord>,
    tx: &mpsc::Sender<Document>,
    cancel: &CancelSignal,
) -> Result<u64> {
    let mut transformed = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancel.error()),
            next = rx.recv() => next,
        };

        let Some(record) = next else {
            break;
        };

        let document = transform(record);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancel.error()),
            sent = tx.send(document) => sent.map_err(|_| {
                IngestError::stage_aborted(Stage::Commit, "document channel closed")
            })?,
        }
        transformed += 1;
    }

    // Upstream closes its channel on failure too; only a clean close is end of input.
    if cancel.is_cancelled() {
        return Err(cancel.error());
    }

    debug!(documents = transformed, "Record channel closed");
    Ok(transformed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pipeline::CancelReason;
    use geoip_common::checksum::range_id;

    fn record(start: &str, end: &str) -> RawRecord {
        RawRecord::from_fields([
            start, end, "us", "ca", "6", "san jose", "4", "broadband", "acme", "", "",
        ])
        .unwrap()
    }

    #[test]
    fn test_transform_assigns_range_id() {
        let doc = transform(record("10.0.0.0", "10.0.0.255"));
        assert_eq!(doc.id, range_id("10.0.0.0", "10.0.0.255"));
        assert_eq!(doc.ip_address.start, "10.0.0.0");
        assert_eq!(doc.ip_address.end, "10.0.0.255");
        assert_eq!(doc.city, "san jose");
    }

    #[tokio::test]
    async fn test_transform_records_preserves_order() {
        let (record_tx, mut record_rx) = mpsc::channel(4);
        let (doc_tx, mut doc_rx) = mpsc::channel(4);
        let cancel = CancelSignal::new();

        let producer = tokio::spawn(async move {
            for i in 0..10 {
                let start = format!("10.0.{}.0", i);
                let end = format!("10.0.{}.255", i);
                record_tx.send(record(&start, &end)).await.unwrap();
            }
        });

        let stage = {
            let cancel = cancel.clone();
            tokio::spawn(async move { transform_records(&mut record_rx, &doc_tx, &cancel).await })
        };

        let mut starts = Vec::new();
        while let Some(doc) = doc_rx.recv().await {
            starts.push(doc.ip_address.start);
        }

        producer.await.unwrap();
        assert_eq!(stage.await.unwrap().unwrap(), 10);
        let expected: Vec<String> = (0..10).map(|i| format!("10.0.{}.0", i)).collect();
        assert_eq!(starts, expected);
    }

    #[tokio::test]
    async fn test_closed_input_after_cancel_is_not_clean_end() {
        let (record_tx, mut record_rx) = mpsc::channel::<RawRecord>(1);
        let (doc_tx, _doc_rx) = mpsc::channel(1);
        let cancel = CancelSignal::new();

        cancel.cancel(CancelReason::StageFailed(Stage::Source));
        drop(record_tx);

        let err = transform_records(&mut record_rx, &doc_tx, &cancel)
            .await
            .unwrap_err();
        match err {
            IngestError::Cancelled { reason } => {
                assert_eq!(reason, CancelReason::StageFailed(Stage::Source))
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
