// tests/analyze_stages.rs
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use feedloom::ai::providers::MockProvider;
use feedloom::ai::{BudgetCaps, BudgetGuard, Candidate, ProviderRouter};
use feedloom::analyze::{classify_pending, summarize_pending, StageOptions, UNCLASSIFIED};
use feedloom::ingest::types::SourceKind;
use feedloom::store::{Item, ItemStore, MemoryItemStore};

fn item(id: &str, summary: Option<&str>) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Title of {id}"),
        url: Some(format!("https://example.com/{id}")),
        source_type: SourceKind::BookmarkCollection,
        source_key: "reading".into(),
        published_at: None,
        ingested_at: Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap(),
        summary: summary.map(str::to_string),
        classifications: None,
        enrichment: None,
    }
}

fn router_of(providers: Vec<(&str, Arc<MockProvider>)>, guard: BudgetGuard) -> ProviderRouter {
    let candidates = providers
        .into_iter()
        .map(|(id, p)| Candidate::new(id, "m1", p))
        .collect();
    ProviderRouter::new(candidates, guard)
}

fn labels() -> Vec<String> {
    vec!["Rust".into(), "Databases".into()]
}

#[tokio::test]
async fn summaries_are_written_with_enrichment() {
    let mut items =
        MemoryItemStore::with_items(vec![item("raindrop:1", None), item("raindrop:2", Some("done"))])
            .unwrap();
    let p = Arc::new(MockProvider::fixed("  A piece about\nparsers.  "));
    let router = router_of(vec![("openai", p.clone())], BudgetGuard::new());

    let r = summarize_pending(&mut items, &router, &StageOptions::default())
        .await
        .unwrap();
    assert_eq!((r.attempted, r.succeeded, r.exhausted), (1, 1, 0));
    assert_eq!(p.calls(), 1);

    let it = items.get("raindrop:1").unwrap();
    assert_eq!(it.summary.as_deref(), Some("A piece about parsers."));
    let e = it.enrichment.as_ref().unwrap();
    assert_eq!(e.provider_id, "openai");
    assert_eq!(e.model, "m1");
    assert!(e.tokens.total > 0);
    assert_eq!(items.get("raindrop:2").unwrap().summary.as_deref(), Some("done"));
}

#[tokio::test]
async fn exhausted_router_leaves_items_untouched() {
    let original = vec![item("raindrop:1", None), item("raindrop:2", None)];
    let mut items = MemoryItemStore::with_items(original.clone()).unwrap();
    let router = router_of(
        vec![
            ("a", Arc::new(MockProvider::failing(500))),
            ("b", Arc::new(MockProvider::failing(429))),
        ],
        BudgetGuard::new(),
    );

    let r = summarize_pending(&mut items, &router, &StageOptions::default())
        .await
        .unwrap();
    assert_eq!((r.attempted, r.succeeded, r.exhausted), (2, 0, 2));
    assert!(!r.budget_stopped);
    assert_eq!(items.items(), original.as_slice());
    assert_eq!(items.writes, 0);
}

#[tokio::test]
async fn control_only_completion_leaves_item_pending() {
    let mut items = MemoryItemStore::with_items(vec![item("raindrop:1", None)]).unwrap();
    let p = Arc::new(MockProvider::fixed("\u{0}\u{7}"));
    let router = router_of(vec![("noisy", p.clone())], BudgetGuard::new());

    let r = summarize_pending(&mut items, &router, &StageOptions::default())
        .await
        .unwrap();
    assert_eq!((r.attempted, r.succeeded, r.exhausted), (1, 0, 1));
    assert_eq!(p.calls(), 1);
    assert_eq!(router.budget().usage("noisy").calls, 1);
    assert!(items.get("raindrop:1").unwrap().summary.is_none());
    assert_eq!(items.writes, 0);
}

#[tokio::test]
async fn budget_exhaustion_stops_the_stage() {
    let mut items = MemoryItemStore::with_items(vec![
        item("raindrop:1", None),
        item("raindrop:2", None),
        item("raindrop:3", None),
    ])
    .unwrap();
    let p = Arc::new(MockProvider::fixed("Summary."));
    let guard = BudgetGuard::new().with_caps(
        "only",
        BudgetCaps {
            max_calls: Some(1),
            max_spend: None,
        },
    );
    let router = router_of(vec![("only", p.clone())], guard);

    let r = summarize_pending(&mut items, &router, &StageOptions::default())
        .await
        .unwrap();
    assert_eq!((r.attempted, r.succeeded, r.exhausted), (2, 1, 1));
    assert!(r.budget_stopped);
    assert_eq!(p.calls(), 1);
    assert!(items.get("raindrop:3").unwrap().summary.is_none());
}

#[tokio::test]
async fn per_run_item_cap_is_respected() {
    let mut items = MemoryItemStore::with_items(
        (1..=5).map(|i| item(&format!("raindrop:{i}"), None)).collect(),
    )
    .unwrap();
    let router = router_of(
        vec![("m", Arc::new(MockProvider::fixed("s")))],
        BudgetGuard::new(),
    );
    let opts = StageOptions {
        max_items_per_run: 2,
        ..StageOptions::default()
    };
    let r = summarize_pending(&mut items, &router, &opts).await.unwrap();
    assert_eq!(r.succeeded, 2);
    let done: Vec<&str> = items
        .items()
        .iter()
        .filter(|i| i.summary.is_some())
        .map(|i| i.id.as_str())
        .collect();
    assert_eq!(done, vec!["raindrop:1", "raindrop:2"]);
}

#[tokio::test]
async fn classification_filters_to_known_labels() {
    let mut items = MemoryItemStore::with_items(vec![
        item("raindrop:1", Some("About a Rust ORM.")),
        item("raindrop:2", None),
    ])
    .unwrap();
    let router = router_of(
        vec![("m", Arc::new(MockProvider::fixed("databases, RUST, gardening")))],
        BudgetGuard::new(),
    );

    let r = classify_pending(&mut items, &router, &labels(), &StageOptions::default())
        .await
        .unwrap();
    assert_eq!(r.succeeded, 1);
    assert_eq!(
        items.get("raindrop:1").unwrap().classifications,
        Some(vec!["Databases".to_string(), "Rust".to_string()])
    );
    // Not summarized yet, so not classified.
    assert!(items.get("raindrop:2").unwrap().classifications.is_none());
}

#[tokio::test]
async fn answer_without_known_labels_is_recorded_as_unclassified() {
    let mut items = MemoryItemStore::with_items(vec![item("raindrop:1", Some("Cooking."))]).unwrap();
    let p = Arc::new(MockProvider::fixed("cooking"));
    let router = router_of(vec![("m", p.clone())], BudgetGuard::new());

    classify_pending(&mut items, &router, &labels(), &StageOptions::default())
        .await
        .unwrap();
    assert_eq!(
        items.get("raindrop:1").unwrap().classifications,
        Some(vec![UNCLASSIFIED.to_string()])
    );

    // Already classified: a second pass makes no calls.
    classify_pending(&mut items, &router, &labels(), &StageOptions::default())
        .await
        .unwrap();
    assert_eq!(p.calls(), 1);
}

#[tokio::test]
async fn no_labels_means_no_classification_calls() {
    let mut items = MemoryItemStore::with_items(vec![item("raindrop:1", Some("x"))]).unwrap();
    let p = Arc::new(MockProvider::fixed("Rust"));
    let router = router_of(vec![("m", p.clone())], BudgetGuard::new());
    let r = classify_pending(&mut items, &router, &[], &StageOptions::default())
        .await
        .unwrap();
    assert_eq!(r.attempted, 0);
    assert_eq!(p.calls(), 0);
}
