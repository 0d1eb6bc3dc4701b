//! Pipeline behaviour tests
//!
//! Drive the full three-stage pipeline against the in-memory sink:
//! - batching and the final flush
//! - end-to-end ordering
//! - fail-fast on sink, source and panicking stages
//! - external and deadline cancellation

use async_trait::async_trait;
use geoip_common::checksum::range_id;
use geoip_common::types::Document;
use geoip_ingest::pipeline::{CancelReason, Pipeline, Stage};
use geoip_ingest::sink::{CommitReport, DocumentSink, MemorySink};
use geoip_ingest::source::RecordSource;
use geoip_ingest::{ErrorKind, IngestError};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn line(n: usize) -> String {
    format!(
        "10.{}.{}.0;10.{}.{}.255;us;ca;6;san jose;4;broadband;isp-{};;\n",
        n / 256,
        n % 256,
        n / 256,
        n % 256,
        n
    )
}

fn input(count: usize) -> String {
    let mut text = String::from("# start;end;country;region;rc;city;cc;speed;isp;carrier;carrier-code\n");
    for n in 0..count {
        text.push_str(&line(n));
    }
    text
}

fn source(text: String) -> RecordSource<Cursor<Vec<u8>>> {
    RecordSource::from_reader(Cursor::new(text.into_bytes()), ';', '#').unwrap()
}

fn start_ip(n: usize) -> String {
    format!("10.{}.{}.0", n / 256, n % 256)
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_three_records_batch_two() {
    let sink = MemorySink::new();
    let summary = Pipeline::new(Arc::new(sink.clone()), 2)
        .run(source(input(3)))
        .await
        .unwrap();

    assert_eq!(sink.batch_sizes(), vec![2, 1]);
    assert_eq!(summary.documents, 3);
    assert_eq!(summary.batches, 2);
}

#[tokio::test]
async fn test_batch_count_is_ceiling() {
    for (count, batch_size) in [(0, 3), (1, 3), (9, 3), (10, 3), (7, 1), (5, 100)] {
        let sink = MemorySink::counting();
        let summary = Pipeline::new(Arc::new(sink.clone()), batch_size)
            .run(source(input(count)))
            .await
            .unwrap();

        let expected_batches = count.div_ceil(batch_size);
        assert_eq!(sink.batch_sizes().len(), expected_batches, "{count} / {batch_size}");
        assert_eq!(sink.batch_sizes().iter().sum::<usize>(), count);
        assert!(sink.batch_sizes().iter().all(|&size| size <= batch_size));
        assert_eq!(summary.documents, count as u64);
    }
}

#[tokio::test]
async fn test_partial_batch_is_flushed() {
    let sink = MemorySink::new();
    Pipeline::new(Arc::new(sink.clone()), 4)
        .run(source(input(6)))
        .await
        .unwrap();

    assert_eq!(sink.batch_sizes(), vec![4, 2]);
    let last = sink.batches().pop().unwrap();
    assert_eq!(last[1].ip_address.start, start_ip(5));
}

#[tokio::test]
async fn test_order_preserved_end_to_end() {
    let sink = MemorySink::new();
    Pipeline::new(Arc::new(sink.clone()), 4)
        .with_channel_capacity(1)
        .run(source(input(25)))
        .await
        .unwrap();

    let starts: Vec<String> = sink
        .documents()
        .into_iter()
        .map(|doc| doc.ip_address.start)
        .collect();
    let expected: Vec<String> = (0..25).map(start_ip).collect();
    assert_eq!(starts, expected);
}

#[tokio::test]
async fn test_documents_carry_range_ids() {
    let sink = MemorySink::new();
    Pipeline::new(Arc::new(sink.clone()), 10)
        .run(source(input(3)))
        .await
        .unwrap();

    for doc in sink.documents() {
        assert_eq!(doc.id, range_id(&doc.ip_address.start, &doc.ip_address.end));
    }
}

#[tokio::test]
async fn test_throughput_counts_committed_documents() {
    let sink = MemorySink::counting();
    let pipeline = Pipeline::new(Arc::new(sink), 3);
    let throughput = pipeline.throughput();

    pipeline.run(source(input(8))).await.unwrap();
    assert_eq!(throughput.total(), 8);
}

#[tokio::test]
async fn test_elapsed_measured_from_run_start() {
    let pipeline = Pipeline::new(Arc::new(MemorySink::counting()), 3);

    // Time between building and running is not part of the run
    std::thread::sleep(Duration::from_millis(500));

    let summary = pipeline.run(source(input(8))).await.unwrap();
    assert!(summary.elapsed < Duration::from_millis(500), "elapsed {:?}", summary.elapsed);
}

#[tokio::test]
async fn test_reads_file_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(input(5).as_bytes()).unwrap();
    file.write_all(b"# trailing comment\n\n").unwrap();
    file.flush().unwrap();

    let sink = MemorySink::new();
    let source = RecordSource::open(file.path(), ';', '#').await.unwrap();
    let summary = Pipeline::new(Arc::new(sink.clone()), 2)
        .run(source)
        .await
        .unwrap();

    assert_eq!(summary.documents, 5);
    assert_eq!(sink.batch_sizes(), vec![2, 2, 1]);
    assert_eq!(sink.documents()[4].isp, "isp-4");
}

// ============================================================================
// Fail-fast
// ============================================================================

#[tokio::test]
async fn test_rejected_batch_stops_pipeline() {
    let sink = MemorySink::new().failing_on(3);
    let err = Pipeline::new(Arc::new(sink.clone()), 2)
        .run(source(input(20)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SinkCommit);
    assert_eq!(sink.commit_attempts(), 3);
    assert_eq!(sink.batch_sizes(), vec![2, 2]);
}

#[tokio::test]
async fn test_rejected_final_flush_is_reported() {
    let sink = MemorySink::new().failing_on(2);
    let err = Pipeline::new(Arc::new(sink.clone()), 2)
        .run(source(input(3)))
        .await
        .unwrap_err();

    match err {
        IngestError::SinkCommit { batch_len, .. } => assert_eq!(batch_len, 1),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_record_stops_pipeline_without_flush() {
    let mut text = input(5);
    text.push_str("10.9.9.0;10.9.9.255;us\n");
    text.push_str(&line(6));

    let sink = MemorySink::new();
    let err = Pipeline::new(Arc::new(sink.clone()), 2)
        .run(source(text))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceRead);
    assert!(err.to_string().contains("expected 11, got 3"));
    // Only full batches can have been written; the remainder is never flushed.
    assert!(sink.batch_sizes().iter().all(|&size| size == 2));
    assert!(sink.documents().len() <= 4);
}

struct PanickingSink;

#[async_trait]
impl DocumentSink for PanickingSink {
    async fn commit(&self, _batch: &[Document]) -> geoip_ingest::Result<CommitReport> {
        panic!("sink exploded");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

#[tokio::test]
async fn test_panicking_stage_is_reported() {
    let err = Pipeline::new(Arc::new(PanickingSink), 1)
        .run(source(input(10)))
        .await
        .unwrap_err();

    match err {
        IngestError::StageAborted { stage, .. } => assert_eq!(stage, Stage::Commit),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let err = Pipeline::new(Arc::new(MemorySink::new()), 0)
        .run(source(input(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_external_cancel_stops_hung_sink() {
    let sink = MemorySink::new().with_commit_delay(Duration::from_secs(3600));
    let pipeline = Pipeline::new(Arc::new(sink.clone()), 10);
    let cancel = pipeline.cancel_signal();

    let run = tokio::spawn(async move { pipeline.run(source(input(100))).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel(CancelReason::External);

    let err = run.await.unwrap().unwrap_err();
    match err {
        IngestError::Cancelled { reason } => assert_eq!(reason, CancelReason::External),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(sink.batch_sizes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_external_cancel_stops_blocked_source() {
    let sink = MemorySink::new();
    let pipeline = Pipeline::new(Arc::new(sink.clone()), 10);
    let cancel = pipeline.cancel_signal();

    // One record arrives, then the writer stays open without sending more
    let (mut writer, reader) = tokio::io::duplex(64);
    writer.write_all(line(0).as_bytes()).await.unwrap();
    let source = RecordSource::from_reader(reader, ';', '#').unwrap();

    let run = tokio::spawn(async move { pipeline.run(source).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!run.is_finished());
    cancel.cancel(CancelReason::External);

    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("pipeline kept waiting on its input")
        .unwrap()
        .unwrap_err();
    match err {
        IngestError::Cancelled { reason } => assert_eq!(reason, CancelReason::External),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(sink.commit_attempts(), 0);
    drop(writer);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_run() {
    let sink = MemorySink::new().with_commit_delay(Duration::from_secs(60));
    let err = Pipeline::new(Arc::new(sink.clone()), 5)
        .with_deadline(Some(Duration::from_secs(90)))
        .run(source(input(50)))
        .await
        .unwrap_err();

    match err {
        IngestError::Cancelled { reason } => assert_eq!(reason, CancelReason::DeadlineExceeded),
        other => panic!("unexpected error: {other:?}"),
    }
    // One commit fits before the deadline, the second is abandoned mid-flight.
    assert_eq!(sink.batch_sizes(), vec![5]);
}

#[tokio::test]
async fn test_cancel_before_run() {
    let sink = MemorySink::new();
    let pipeline = Pipeline::new(Arc::new(sink.clone()), 2);
    pipeline.cancel_signal().cancel(CancelReason::External);

    let err = pipeline.run(source(input(10))).await.unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(sink.commit_attempts(), 0);
}
