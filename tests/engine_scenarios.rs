//! End-to-end ingestion/retrieval scenarios against a real `Engine` backed
//! by a temp directory. Complements the per-module unit tests with the
//! cross-component paths: restart recovery, metadata filtering, and
//! context-window budgeting.
use recall::config::ExtractionMode;
use recall::engine::SearchRequest;
use recall::types::{NewItem, Scope};
use recall::{Config, Engine};

fn config_at(dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.data_root = dir.to_path_buf();
    cfg.extraction_mode = ExtractionMode::Rules;
    cfg
}

#[tokio::test]
async fn metadata_filter_narrows_to_matching_source() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    let scope = Scope::for_user("filter-user");

    let sources = ["github", "bilibili", "github", "twitter", "github"];
    for (i, source) in sources.iter().enumerate() {
        engine
            .add(NewItem {
                content: format!("AI news item number {i}"),
                scope: scope.clone(),
                source: Some(source.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let request = SearchRequest {
        query: "news".into(),
        top_k: 10,
        source: Some("github".into()),
        ..Default::default()
    };
    let (results, _stats) = engine.search(&request, &scope).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|m| m.content.contains("news")));
}

#[tokio::test]
async fn restart_preserves_items_and_compacts_wal() {
    let dir = tempfile::tempdir().unwrap();
    let scope = Scope::for_user("restart-user");

    let mut ids = Vec::new();
    {
        let engine = Engine::open(config_at(dir.path())).await.unwrap();
        for i in 0..50 {
            let result = engine
                .add(NewItem {
                    content: format!("note {i} mentions alice"),
                    scope: scope.clone(),
                    ..Default::default()
                })
                .await
                .unwrap();
            ids.push(result.id);
        }
        engine.close().await.unwrap();
    }

    // Simulate a process restart: reopen against the same data root.
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    assert_eq!(engine.stats().total_turns, 50);

    for id in &ids {
        assert!(engine.get(id, &scope).await.unwrap().is_some());
    }

    let request = SearchRequest { query: "alice".into(), top_k: 100, ..Default::default() };
    let (results, _) = engine.search(&request, &scope).await.unwrap();
    assert_eq!(results.len(), 50);
}

#[tokio::test]
async fn crash_restart_without_close_still_compacts_wal_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let scope = Scope::for_user("crash-user");

    let mut ids = Vec::new();
    {
        let engine = Engine::open(config_at(dir.path())).await.unwrap();
        for i in 0..50 {
            let result = engine
                .add(NewItem {
                    content: format!("note {i} mentions alice"),
                    scope: scope.clone(),
                    ..Default::default()
                })
                .await
                .unwrap();
            ids.push(result.id);
        }
        // No `engine.close()`: the process is terminated mid-way, so the
        // inverted index's WAL is left on disk, uncompacted.
    }
    assert!(dir.path().join("indexes/inverted_wal.jsonl").exists());

    // Reopening replays the WAL and must compact it away.
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    assert!(!dir.path().join("indexes/inverted_wal.jsonl").exists());
    assert_eq!(engine.stats().total_turns, 50);

    for id in &ids {
        assert!(engine.get(id, &scope).await.unwrap().is_some());
    }

    let request = SearchRequest { query: "alice".into(), top_k: 100, ..Default::default() };
    let (results, _) = engine.search(&request, &scope).await.unwrap();
    assert_eq!(results.len(), 50);
}

#[tokio::test]
async fn tenant_isolation_and_protected_default_scope() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    let alice = Scope::for_user("alice");
    let bob = Scope::for_user("bob");

    engine.add(NewItem { content: "secret".into(), scope: alice.clone(), ..Default::default() }).await.unwrap();
    engine.add(NewItem { content: "public".into(), scope: bob.clone(), ..Default::default() }).await.unwrap();

    // Clearing alice's scope never touches bob's items.
    engine.clear(&alice, true).await.unwrap();
    let bob_request = SearchRequest { query: "public".into(), top_k: 5, ..Default::default() };
    let (bob_results, _) = engine.search(&bob_request, &bob).await.unwrap();
    assert!(bob_results.iter().any(|m| m.content == "public"));

    let alice_all = engine.get_all(&alice, 100).await.unwrap();
    assert!(alice_all.is_empty());

    // The default scope refuses to clear without confirm=true.
    let err = engine.clear(&Scope::default(), false).await.unwrap_err();
    assert!(matches!(err, recall::RecallError::ScopeDenied { .. }));
}

#[tokio::test]
async fn context_budget_is_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    let scope = Scope::for_user("budget-user");

    for i in 0..20 {
        engine
            .add(NewItem {
                content: format!(
                    "memory item {i} describing a moderately long conversational turn about plans"
                ),
                scope: scope.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let request = SearchRequest { query: "plans".into(), top_k: 20, ..Default::default() };
    let context = engine.build_context(&request, &scope, 200.0, 0, None).await.unwrap();
    assert!(context.total_tokens <= 200.0);
    assert!(context.memory_count > 0);
}

#[tokio::test]
async fn adding_same_content_twice_produces_two_distinct_items() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    let scope = Scope::for_user("dup-user");

    let first = engine
        .add(NewItem { content: "shared phrase here".into(), scope: scope.clone(), ..Default::default() })
        .await
        .unwrap();
    let second = engine
        .add(NewItem { content: "shared phrase here".into(), scope: scope.clone(), ..Default::default() })
        .await
        .unwrap();
    assert_ne!(first.id, second.id);

    let request = SearchRequest { query: "shared".into(), top_k: 10, ..Default::default() };
    let (results, _) = engine.search(&request, &scope).await.unwrap();
    let ids: std::collections::HashSet<_> = results.iter().map(|m| m.id.clone()).collect();
    assert!(ids.contains(&first.id));
    assert!(ids.contains(&second.id));
}

#[tokio::test]
async fn clear_resets_scope_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config_at(dir.path())).await.unwrap();
    let scope = Scope::for_user("clear-user");

    engine.add(NewItem { content: "one".into(), scope: scope.clone(), ..Default::default() }).await.unwrap();
    engine.add(NewItem { content: "two".into(), scope: scope.clone(), ..Default::default() }).await.unwrap();
    engine.clear(&scope, true).await.unwrap();

    assert!(engine.get_all(&scope, 100).await.unwrap().is_empty());
    let request = SearchRequest { query: "one".into(), top_k: 10, ..Default::default() };
    let (results, _) = engine.search(&request, &scope).await.unwrap();
    assert!(results.is_empty());
}
