//! Indexing pass behaviour against a fake backend and a real SQLite store.

use crate::common::{EmbedFault, FAKE_CHECKSUM, FakeBackend, Harness, test_config};
use semindex::embedder::INDEXING_TASK_ID;
use semindex::storage::EMBEDDING_COLUMN_DIMS;
use semindex::tasks::TaskKind;
use semindex::{ContentType, DaemonState, EmbedderError, ErrorKind, TaskRegistry};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Rows {
    long_doc: i64,
    embedded: i64,
    short_title: i64,
}

/// Three rows: one needing three chunks, one already embedded, one short.
fn seed(harness: &Harness) -> Rows {
    let store = &harness.store;
    store.reset_embeddings(FAKE_CHECKSUM).unwrap();

    let long_doc = store
        .insert_text(ContentType::Document, "01234567890123456789", "")
        .unwrap();
    let embedded = store
        .insert_text(ContentType::Document, "this one is already embedded", "")
        .unwrap();
    store
        .insert_raw_embedding(embedded, &vec![0i8; EMBEDDING_COLUMN_DIMS])
        .unwrap();
    let short_title = store
        .insert_text(ContentType::Title, "tiny-text", "")
        .unwrap();

    Rows {
        long_doc,
        embedded,
        short_title,
    }
}

#[tokio::test]
async fn test_end_to_end_pass() {
    let mut config = test_config();
    config.pass_size = 1;
    let harness = Harness::new(FakeBackend::new(10), config);
    let rows = seed(&harness);
    let cancel = CancellationToken::new();

    let report = harness.embedder.run_once(&cancel).await.unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(report.vectors, 4);
    assert_eq!(report.batches, 2);

    let calls = harness.backend.embed_inputs.lock().clone();
    assert_eq!(
        calls,
        vec![
            vec![
                "012345678".to_string(),
                "890123456".to_string(),
                "6789".to_string()
            ],
            vec!["tiny-text".to_string()],
        ]
    );

    let store = &harness.store;
    assert_eq!(store.count_embeddings_for(rows.long_doc).unwrap(), 3);
    assert_eq!(store.count_embeddings_for(rows.short_title).unwrap(), 1);
    assert_eq!(store.count_embeddings_for(rows.embedded).unwrap(), 1);

    // Nothing pending on the second run
    let report = harness.embedder.run_once(&cancel).await.unwrap();
    assert_eq!(report.rows, 0);
    assert_eq!(harness.backend.embed_call_count(), 2);
    assert_eq!(store.count_embeddings().unwrap(), 5);

    assert_eq!(harness.backend.load_calls.load(Ordering::SeqCst), 1);
    assert!(harness.registry.task(INDEXING_TASK_ID).is_none());
    assert!(harness.registry.tasks().is_empty());
    assert!(!harness.embedder.is_indexing());
}

#[tokio::test]
async fn test_pass_size_groups_rows_into_one_call() {
    let harness = Harness::new(FakeBackend::new(100), test_config());
    for text in ["first text", "second text", "third text"] {
        harness
            .store
            .insert_text(ContentType::Comment, text, "")
            .unwrap();
    }

    let report = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rows, 3);
    assert_eq!(report.batches, 1);
    assert_eq!(harness.backend.embed_call_count(), 1);
}

#[tokio::test]
async fn test_contact_and_short_rows_are_skipped() {
    let harness = Harness::new(FakeBackend::new(100), test_config());
    harness
        .store
        .insert_text(ContentType::Contact, "someone@example.com", "")
        .unwrap();
    harness
        .store
        .insert_text(ContentType::Title, "abc", "")
        .unwrap();

    let report = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rows, 0);
    assert_eq!(harness.backend.embed_call_count(), 0);
    assert_eq!(harness.store.count_embeddings().unwrap(), 0);
}

#[tokio::test]
async fn test_document_prefix_applied_to_every_chunk() {
    let mut config = test_config();
    config.document_prefix = "passage: ".to_string();
    let harness = Harness::new(FakeBackend::new(10), config);
    harness
        .store
        .insert_text(ContentType::Document, "01234567890123456789", "")
        .unwrap();

    harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let calls = harness.backend.embed_inputs.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        vec![
            "passage: 012345678".to_string(),
            "passage: 890123456".to_string(),
            "passage: 6789".to_string()
        ]
    );
}

#[tokio::test]
async fn test_second_pass_is_rejected_while_task_registered() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    seed(&harness);
    harness
        .registry
        .add_task(INDEXING_TASK_ID, TaskKind::Embedding, "held elsewhere", 0)
        .unwrap();

    let err = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::AlreadyRunning));
    assert_eq!(err.kind(), ErrorKind::Concurrency);

    // The other holder keeps its task and nothing was written
    assert!(harness.registry.task(INDEXING_TASK_ID).is_some());
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);
    assert_eq!(harness.backend.embed_call_count(), 0);
}

#[tokio::test]
async fn test_inactive_daemon_is_a_precondition_failure() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    seed(&harness);
    harness.registry.update_global_state(DaemonState::Migrating);

    let err = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EmbedderError::DaemonNotActive {
            state: DaemonState::Migrating
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(harness.registry.tasks().is_empty());
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);

    // Retrying once the daemon is active succeeds
    harness.registry.update_global_state(DaemonState::Active);
    let report = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rows, 2);
}

#[tokio::test]
async fn test_backend_failure_cleans_up_task() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    seed(&harness);
    harness.backend.fail_embed.store(true, Ordering::SeqCst);

    let err = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(harness.registry.task(INDEXING_TASK_ID).is_none());
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);

    harness.backend.fail_embed.store(false, Ordering::SeqCst);
    harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(harness.store.count_embeddings().unwrap(), 5);
}

#[tokio::test]
async fn test_cancelled_pass_writes_nothing() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    seed(&harness);
    harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = harness.embedder.run_once(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(harness.registry.tasks().is_empty());
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);
}

#[tokio::test]
async fn test_short_vectors_fail_the_pass() {
    let backend = FakeBackend::new(10).with_embed_fault(EmbedFault::ShortVectors);
    let harness = Harness::new(backend, test_config());
    seed(&harness);

    let err = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EmbedderError::DimensionMismatch {
            expected: EMBEDDING_COLUMN_DIMS,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(harness.registry.task(INDEXING_TASK_ID).is_none());
    assert!(!harness.embedder.is_indexing());
    // Only the pre-seeded embedding exists
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);
}

#[tokio::test]
async fn test_missing_output_fails_the_pass() {
    let backend = FakeBackend::new(10).with_embed_fault(EmbedFault::DropLast);
    let harness = Harness::new(backend, test_config());
    seed(&harness);

    let err = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EmbedderError::CountMismatch {
            expected: 4,
            actual: 3
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(harness.registry.task(INDEXING_TASK_ID).is_none());
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);
}

#[tokio::test]
async fn test_dropped_pass_releases_task() {
    let backend = FakeBackend::new(10).with_call_delay(Duration::from_millis(500));
    let harness = Harness::new(backend, test_config());
    seed(&harness);
    harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        harness.embedder.run_once(&cancel),
    )
    .await;
    assert!(timed_out.is_err());

    assert!(harness.registry.task(INDEXING_TASK_ID).is_none());
    assert!(!harness.embedder.is_indexing());
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);

    let report = harness.embedder.run_once(&cancel).await.unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(harness.store.count_embeddings().unwrap(), 5);
}

#[tokio::test]
async fn test_progress_starts_from_already_embedded() {
    let backend = FakeBackend::new(10).with_call_delay(Duration::from_millis(500));
    let harness = Harness::new(backend, test_config());
    seed(&harness);
    harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap();

    let embedder = Arc::clone(&harness.embedder);
    let pass = tokio::spawn(async move { embedder.run_once(&CancellationToken::new()).await });

    let mut observed = None;
    for _ in 0..100 {
        if let Some(task) = harness.registry.task(INDEXING_TASK_ID) {
            observed = Some(task);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let task = observed.expect("indexing task never registered");
    assert_eq!(task.total, 3);
    assert_eq!(task.completed, 1);

    pass.await.unwrap().unwrap();
    assert!(harness.registry.task(INDEXING_TASK_ID).is_none());
}
