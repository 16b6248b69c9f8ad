mod common;

use tempfile::TempDir;

use common::{FakeExternal, external, open_index};
use sage_core::RetrievalMode;
use sage_gateway::{RetrievalError, RetrievalOutcome, RetrievalStrategy, RetrievedContext};

#[tokio::test]
async fn test_knowledge_context_joins_chunks_and_dedups_labels() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;
    index
        .add_document("Paris is the capital of France.", "doc1", "geo.txt")
        .await
        .expect("add");
    index
        .add_document("Berlin is the capital of Germany.", "doc2", "geo.txt")
        .await
        .expect("add");

    let wikipedia = FakeExternal::answering("Wikipedia", "unused");
    let strategy = RetrievalStrategy::new(index, external(vec![wikipedia.clone()]), 2);

    let outcome = strategy
        .retrieve("capital", RetrievalMode::KbThenExternal)
        .await
        .expect("retrieve");
    let RetrievalOutcome::Context(context) = outcome else {
        panic!("expected context");
    };
    assert_eq!(context.sources, vec!["geo.txt"]);
    assert_eq!(context.text.split("\n\n").count(), 2);
    assert!(context.text.contains("Paris") && context.text.contains("Berlin"));
    assert_eq!(wikipedia.calls(), 0);
}

#[tokio::test]
async fn test_kb_only_never_searches_externally() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;
    let wikipedia = FakeExternal::answering("Wikipedia", "Paris is a city.");
    let strategy = RetrievalStrategy::new(index, external(vec![wikipedia.clone()]), 3);

    let outcome = strategy
        .retrieve("capital of France", RetrievalMode::KbOnly)
        .await
        .expect("retrieve");
    assert_eq!(outcome, RetrievalOutcome::NoContext);
    assert_eq!(wikipedia.calls(), 0);
}

#[tokio::test]
async fn test_external_only_ignores_the_index() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;
    index
        .add_document("Paris is the capital of France.", "doc1", "geo.txt")
        .await
        .expect("add");
    let wikipedia = FakeExternal::answering("Wikipedia", "Page: Paris\nSummary: A city.");
    let strategy = RetrievalStrategy::new(index, external(vec![wikipedia]), 3);

    let outcome = strategy
        .retrieve("capital of France", RetrievalMode::ExternalOnly)
        .await
        .expect("retrieve");
    assert_eq!(
        outcome,
        RetrievalOutcome::Context(RetrievedContext {
            text: "Page: Paris\nSummary: A city.".to_string(),
            sources: vec!["Wikipedia".to_string()],
        })
    );
}

#[tokio::test]
async fn test_priority_order_and_partial_failures() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;

    let wikipedia = FakeExternal::failing("Wikipedia");
    let brave = FakeExternal::answering("Brave Search", "Tokio\nhttps://tokio.rs");
    let strategy = RetrievalStrategy::new(
        index.clone(),
        external(vec![wikipedia.clone(), brave.clone()]),
        3,
    );
    let outcome = strategy
        .retrieve("tokio", RetrievalMode::KbThenExternal)
        .await
        .expect("one provider answered");
    assert!(matches!(outcome, RetrievalOutcome::Context(ref c) if c.sources == ["Brave Search"]));
    assert_eq!((wikipedia.calls(), brave.calls()), (1, 1));

    // An error followed by a clean empty answer is "nothing found", not an outage.
    let strategy = RetrievalStrategy::new(
        index,
        external(vec![FakeExternal::failing("Wikipedia"), FakeExternal::empty("Brave Search")]),
        3,
    );
    let outcome = strategy
        .retrieve("tokio", RetrievalMode::ExternalOnly)
        .await
        .expect("not an outage");
    assert_eq!(outcome, RetrievalOutcome::NoContext);
}

#[tokio::test]
async fn test_every_provider_failing_is_an_error() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;
    let strategy = RetrievalStrategy::new(
        index,
        external(vec![FakeExternal::failing("Wikipedia"), FakeExternal::failing("Brave Search")]),
        3,
    );

    let err = strategy
        .retrieve("tokio", RetrievalMode::ExternalOnly)
        .await
        .unwrap_err();
    let RetrievalError::ExternalUnavailable { failures } = err;
    assert_eq!(failures.len(), 2);
    assert!(failures[0].starts_with("Wikipedia:"));
}

#[tokio::test]
async fn test_no_providers_means_no_context() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;
    let strategy = RetrievalStrategy::new(index, external(vec![]), 3);
    assert_eq!(
        strategy
            .retrieve("anything", RetrievalMode::KbThenExternal)
            .await
            .expect("retrieve"),
        RetrievalOutcome::NoContext
    );
}

#[tokio::test]
async fn test_external_responses_are_cached() {
    let temp = TempDir::new().expect("tempdir");
    let index = open_index(&temp).await;
    let wikipedia = FakeExternal::answering("Wikipedia", "Page: Rust\nSummary: A language.");
    let strategy = RetrievalStrategy::new(index, external(vec![wikipedia.clone()]), 3);

    for _ in 0..3 {
        strategy
            .retrieve("rust", RetrievalMode::ExternalOnly)
            .await
            .expect("retrieve");
    }
    assert_eq!(wikipedia.calls(), 1);
}
