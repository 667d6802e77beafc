//! Semantic search over indexed texts.

use crate::common::{FakeBackend, Harness, test_config};
use semindex::{ContentType, ContentTypeFilter, EmbedderError, ErrorKind};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

struct Indexed {
    harness: Harness,
    alpha: i64,
    beta: i64,
    gamma: i64,
}

fn keyword_backend() -> FakeBackend {
    FakeBackend::new(64)
        .with_keyword("alpha", &[(0, 1.0)])
        .with_keyword("beta", &[(1, 1.0)])
        .with_keyword("gamma", &[(0, 0.6), (1, 0.8)])
}

async fn indexed(harness: Harness) -> Indexed {
    let store = &harness.store;
    let alpha = store
        .insert_text(ContentType::Document, "alpha document", "/docs/alpha")
        .unwrap();
    let beta = store
        .insert_text(ContentType::Document, "beta notes", "/docs/beta")
        .unwrap();
    let gamma = store
        .insert_text(ContentType::Comment, "gamma summary", "/notes/gamma")
        .unwrap();
    harness
        .embedder
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    Indexed {
        harness,
        alpha,
        beta,
        gamma,
    }
}

async fn setup() -> Indexed {
    indexed(Harness::new(keyword_backend(), test_config())).await
}

fn ids(results: &semindex::SearchResultMap) -> BTreeSet<i64> {
    results.keys().into_iter().collect()
}

#[tokio::test]
async fn test_default_threshold_returns_everything_scored() {
    let ix = setup().await;
    let results = ix
        .harness
        .embedder
        .search("alpha", 0, &ContentTypeFilter::all(), "", 0.0)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!((results.get(ix.alpha).unwrap() - 1.0).abs() < 1e-3);
    assert!((results.get(ix.gamma).unwrap() - 0.6).abs() < 0.01);
    assert!(results.get(ix.beta).unwrap().abs() < 1e-3);

    let ordered = results.to_list(true);
    assert_eq!(ordered.as_slice()[0].row_id, ix.alpha);
    assert_eq!(results.max().unwrap().row_id, ix.alpha);
    assert_eq!(results.min().unwrap().row_id, ix.beta);
}

#[tokio::test]
async fn test_raising_threshold_never_adds_results() {
    let ix = setup().await;
    let filter = ContentTypeFilter::all();

    let mut previous: Option<BTreeSet<i64>> = None;
    for threshold in [0.0, 0.3, 0.5, 0.7, 0.95] {
        let results = ix
            .harness
            .embedder
            .search("alpha", 20, &filter, "*", threshold)
            .await
            .unwrap();
        assert!(results.iter().all(|(_, score)| score >= threshold - 1e-3));

        let current = ids(&results);
        if let Some(previous) = &previous {
            assert!(current.is_subset(previous), "threshold {threshold} added rows");
        }
        previous = Some(current);
    }

    let half = ix
        .harness
        .embedder
        .search("alpha", 20, &filter, "*", 0.5)
        .await
        .unwrap();
    assert_eq!(ids(&half), BTreeSet::from([ix.alpha, ix.gamma]));
}

#[tokio::test]
async fn test_exact_threshold_only_returns_perfect_scores() {
    let ix = setup().await;
    let results = ix
        .harness
        .embedder
        .search("alpha", 20, &ContentTypeFilter::all(), "*", 1.0)
        .await
        .unwrap();
    assert!(results.iter().all(|(_, score)| (score - 1.0).abs() < 1e-6));
}

#[tokio::test]
async fn test_content_type_and_iri_filters() {
    let ix = setup().await;
    let embedder = &ix.harness.embedder;

    let comments = ContentTypeFilter::new([ContentType::Comment]).unwrap();
    let results = embedder.search("alpha", 20, &comments, "*", 0.0).await.unwrap();
    assert_eq!(ids(&results), BTreeSet::from([ix.gamma]));

    let results = embedder
        .search("alpha", 20, &ContentTypeFilter::all(), "/docs/*", 0.0)
        .await
        .unwrap();
    assert_eq!(ids(&results), BTreeSet::from([ix.alpha, ix.beta]));

    let results = embedder
        .search_with_flags("alpha", 20, [("document", true), ("comment", false)], "", 0.0)
        .await
        .unwrap();
    assert_eq!(ids(&results), BTreeSet::from([ix.alpha, ix.beta]));
}

#[tokio::test]
async fn test_limit_bounds_results() {
    let ix = setup().await;
    let results = ix
        .harness
        .embedder
        .search("alpha", 1, &ContentTypeFilter::all(), "*", 0.0)
        .await
        .unwrap();
    assert_eq!(ids(&results), BTreeSet::from([ix.alpha]));

    let results = ix
        .harness
        .embedder
        .search("alpha", 5000, &ContentTypeFilter::all(), "*", 0.0)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_invalid_filters_are_rejected() {
    let ix = setup().await;
    let embedder = &ix.harness.embedder;

    let err = embedder
        .search_with_flags("alpha", 20, [("title", true), ("blob", false)], "*", 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::InvalidFilter { .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = embedder
        .search_with_flags("alpha", 20, [("title", false), ("document", false)], "*", 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::InvalidFilter { .. }));
}

#[tokio::test]
async fn test_search_requires_loaded_model() {
    let harness = Harness::new(keyword_backend(), test_config());
    let err = harness
        .embedder
        .search("alpha", 20, &ContentTypeFilter::all(), "*", 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::ModelNotLoaded));
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn test_unreliable_query_is_rejected() {
    let mut config = test_config();
    config.unreliable_probe = Some("qzxv wkpf".to_string());
    let ix = indexed(Harness::new(keyword_backend(), config)).await;
    let embedder = &ix.harness.embedder;

    // No keyword, so the query lands on the probe's direction
    let err = embedder
        .search("unrelated words", 20, &ContentTypeFilter::all(), "*", 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedderError::UnreliableEmbedding));

    let results = embedder
        .search("beta", 20, &ContentTypeFilter::all(), "*", 0.9)
        .await
        .unwrap();
    assert_eq!(ids(&results), BTreeSet::from([ix.beta]));
}

#[tokio::test]
async fn test_cancelled_search() {
    let ix = setup().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ix
        .harness
        .embedder
        .search_cancellable("alpha", 20, &ContentTypeFilter::all(), "*", 0.0, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
