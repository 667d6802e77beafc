//! Model loading, validation and checksum reconciliation.

use crate::common::{FakeBackend, Harness, test_config};
use semindex::embedder::MODEL_TASK_ID;
use semindex::{ContentType, ContentTypeFilter, EmbedderError, ErrorKind, ModelState};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_changed_checksum_discards_embeddings() {
    let harness = Harness::new(FakeBackend::new(50).with_checksum("model-a"), test_config());
    let id = harness
        .store
        .insert_text(ContentType::Document, "some document text", "")
        .unwrap();
    harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(harness.store.count_embeddings_for(id).unwrap(), 1);
    assert_eq!(
        harness.store.model_checksum().unwrap().as_deref(),
        Some("model-a")
    );

    let harness = harness.reopen(FakeBackend::new(50).with_checksum("model-b"), test_config());
    harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(harness.store.count_embeddings().unwrap(), 0);
    assert_eq!(
        harness.store.model_checksum().unwrap().as_deref(),
        Some("model-b")
    );

    // Everything is pending again and gets re-embedded
    let report = harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rows, 1);
    assert_eq!(harness.store.count_embeddings_for(id).unwrap(), 1);
}

#[tokio::test]
async fn test_same_checksum_keeps_embeddings() {
    let harness = Harness::new(FakeBackend::new(50), test_config());
    harness
        .store
        .insert_text(ContentType::Title, "a stable title", "")
        .unwrap();
    harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let harness = harness.reopen(FakeBackend::new(50), test_config());
    harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(harness.store.count_embeddings().unwrap(), 1);
}

#[tokio::test]
async fn test_wrong_dimensions_leave_model_unloaded() {
    let harness = Harness::new(FakeBackend::new(50).with_dimensions(128), test_config());

    let err = harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::Config { .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(harness.embedder.model_state(), ModelState::Unloaded);
    assert_eq!(harness.store.model_checksum().unwrap(), None);

    // A failed load is retried on the next call
    let _ = harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await;
    assert_eq!(harness.backend.load_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_loads_call_backend_once() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    let embedder = Arc::clone(&harness.embedder);

    let (ct_a, ct_b, ct_c) = (
        CancellationToken::new(),
        CancellationToken::new(),
        CancellationToken::new(),
    );
    let (a, b, c) = tokio::join!(
        embedder.ensure_model(&ct_a),
        embedder.ensure_model(&ct_b),
        embedder.ensure_model(&ct_c),
    );
    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert_eq!(a.max_chunk_length, 9);
    assert_eq!(harness.backend.load_calls.load(Ordering::SeqCst), 1);

    let status = harness.embedder.status().unwrap();
    assert_eq!(status.state, "loaded");
    assert_eq!(status.context_size, Some(10));
    assert!(harness.registry.tasks().is_empty());
}

#[tokio::test]
async fn test_status_before_load() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    harness
        .store
        .insert_text(ContentType::Comment, "a pending comment", "")
        .unwrap();

    let status = harness.embedder.status().unwrap();
    assert_eq!(status.state, "unloaded");
    assert_eq!(status.dimensions, None);
    assert_eq!(status.total_embeddable, 1);
    assert_eq!(status.already_embedded, 0);
    assert!(!status.indexing);
}

#[tokio::test]
async fn test_dropped_load_is_retryable() {
    let backend = FakeBackend::new(10).with_load_delay(Duration::from_millis(300));
    let harness = Harness::new(backend, test_config());
    let cancel = CancellationToken::new();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        harness.embedder.ensure_model(&cancel),
    )
    .await;
    assert!(timed_out.is_err());
    assert_eq!(harness.embedder.model_state(), ModelState::Unloaded);
    assert!(harness.registry.task(MODEL_TASK_ID).is_none());

    let model = harness.embedder.ensure_model(&cancel).await.unwrap();
    assert_eq!(model.context_size, 10);
    assert_eq!(harness.backend.load_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_shutdown_releases_model_and_store() {
    let harness = Harness::new(FakeBackend::new(10), test_config());
    harness
        .embedder
        .ensure_model(&CancellationToken::new())
        .await
        .unwrap();

    harness.embedder.shutdown().await.unwrap();
    assert_eq!(harness.backend.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.embedder.model_state(), ModelState::Unloaded);

    let err = harness
        .embedder
        .search("anything", 5, &ContentTypeFilter::all(), "*", 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::ModelNotLoaded));
    assert!(harness.store.count_embeddings().is_err());
}
