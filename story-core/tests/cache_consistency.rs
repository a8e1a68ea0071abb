//! Cache and mutation behaviour against an in-memory story service.
//!
//! Run with: `cargo test -p story-core --test cache_consistency`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use story_core::testing::{sample_input, sample_story};
use story_core::{
    CacheConfig, Invalidate, MockGateway, MutationCoordinator, SortOrder, Story, StoryCache,
    StoryError,
};

fn setup(gateway: MockGateway) -> (Arc<MockGateway>, StoryCache, MutationCoordinator) {
    let gateway = Arc::new(gateway);
    let cache = StoryCache::new(gateway.clone(), &CacheConfig::default());
    let mutations = MutationCoordinator::new(gateway.clone(), cache.clone());
    (gateway, cache, mutations)
}

fn ids(stories: &[Story]) -> Vec<&str> {
    stories.iter().map(|s| s.id.as_str()).collect()
}

fn id_set(stories: &[Story]) -> HashSet<String> {
    stories.iter().map(|s| s.id.clone()).collect()
}

fn assert_sorted(newest: &[Story], oldest: &[Story]) {
    assert!(newest.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert!(oldest.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(id_set(newest), id_set(oldest));
}

/// Let spawned work run to completion (time is paused in these tests).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_orders_are_permutations_of_one_set() {
    let (_gateway, cache, _) = setup(MockGateway::with_stories(vec![
        sample_story("b", 20),
        sample_story("a", 10),
        sample_story("d", 40),
        sample_story("c", 30),
    ]));

    let newest = cache.fetch(SortOrder::Newest).await.unwrap();
    let oldest = cache.fetch(SortOrder::Oldest).await.unwrap();

    assert_eq!(ids(&newest), ["d", "c", "b", "a"]);
    assert_eq!(ids(&oldest), ["a", "b", "c", "d"]);
    assert_sorted(&newest, &oldest);
}

// =============================================================================
// Request sharing
// =============================================================================

#[tokio::test]
async fn test_simultaneous_fetches_make_one_call() {
    let (gateway, cache, _) = setup(MockGateway::with_stories(vec![sample_story("a", 1)]));

    let (first, second) = tokio::join!(
        cache.fetch(SortOrder::Newest),
        cache.fetch(SortOrder::Newest)
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(gateway.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_request_across_tasks() {
    let gateway = MockGateway::with_stories(vec![sample_story("a", 1)])
        .with_latency(Duration::from_millis(200));
    let (gateway, cache, _) = setup(gateway);

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch(SortOrder::Oldest).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(gateway.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_while_in_flight_starts_a_new_request() {
    let gateway = MockGateway::with_stories(vec![sample_story("a", 1)])
        .with_latency(Duration::from_millis(100));
    let (gateway, cache, _) = setup(gateway);

    let early = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch(SortOrder::Newest).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.state(SortOrder::Newest).is_loading);

    cache.invalidate(Invalidate::AllStories);
    gateway.insert(sample_story("b", 2));
    let late = cache.fetch(SortOrder::Newest).await.unwrap();

    assert_eq!(gateway.list_calls(), 2);
    assert_eq!(ids(&late), ["b", "a"]);
    // The superseded request still answers its own caller.
    assert!(early.await.unwrap().is_ok());
    assert_eq!(ids(&cache.peek(SortOrder::Newest).unwrap()), ["b", "a"]);
}

// =============================================================================
// Freshness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_value_served_while_revalidating() {
    let gateway = Arc::new(MockGateway::with_stories(vec![sample_story("a", 1)]));
    let cache = StoryCache::new(
        gateway.clone(),
        &CacheConfig::new().with_stale_time(Duration::from_secs(30)),
    );

    cache.fetch(SortOrder::Newest).await.unwrap();
    gateway.insert(sample_story("b", 2));

    // Still fresh: no request.
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(cache.fetch(SortOrder::Newest).await.unwrap().len(), 1);
    assert_eq!(gateway.list_calls(), 1);

    // Stale: old value right away, refresh behind it.
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(cache.fetch(SortOrder::Newest).await.unwrap().len(), 1);
    settle().await;
    assert_eq!(gateway.list_calls(), 2);

    let refreshed = cache.fetch(SortOrder::Newest).await.unwrap();
    assert_eq!(ids(&refreshed), ["b", "a"]);
    assert_eq!(gateway.list_calls(), 2);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_fetch_is_reported_and_cache_survives() {
    let (gateway, cache, _) = setup(MockGateway::with_stories(vec![sample_story("a", 1)]));

    gateway.fail_next_list(api_error(503));
    let err = cache.fetch(SortOrder::Newest).await.unwrap_err();
    assert!(matches!(err, StoryError::Rejected { status: 503, .. }));
    assert_eq!(cache.peek(SortOrder::Newest), None);

    // No automatic retry; the caller asks again.
    assert_eq!(gateway.list_calls(), 1);
    let stories = cache.fetch(SortOrder::Newest).await.unwrap();
    assert_eq!(stories.len(), 1);
    assert_eq!(cache.state(SortOrder::Newest).error, None);

    cache.invalidate(Invalidate::Stories(SortOrder::Newest));
    gateway.fail_next_list(network_error());
    assert!(cache.fetch(SortOrder::Newest).await.is_err());
    let state = cache.state(SortOrder::Newest);
    assert_eq!(state.data.map(|s| s.len()), Some(1));
    assert!(matches!(state.error, Some(StoryError::Transport(_))));
}

fn api_error(status: u16) -> story_api::Error {
    story_api::Error::Api {
        status,
        message: "unavailable".into(),
    }
}

fn network_error() -> story_api::Error {
    story_api::Error::Network("connection reset".into())
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn test_generate_inserts_into_both_orders() {
    let (gateway, cache, mutations) = setup(MockGateway::with_stories(vec![
        sample_story("old1", 1),
        sample_story("old2", 2),
    ]));
    cache.fetch(SortOrder::Newest).await.unwrap();
    cache.fetch(SortOrder::Oldest).await.unwrap();

    let story = mutations.generate(sample_input()).await.unwrap();
    assert_eq!(story.id, "s1");
    assert_eq!(story.title, "Moon Trip");
    assert_eq!(story.characters, vec!["Mia"]);
    assert_eq!(story.cover_url(), Some("https://img.example/s1/cover.png"));

    let newest = cache.peek(SortOrder::Newest).unwrap();
    let oldest = cache.peek(SortOrder::Oldest).unwrap();
    assert_eq!(ids(&newest), ["s1", "old2", "old1"]);
    assert_eq!(ids(&oldest), ["old1", "old2", "s1"]);
    assert_sorted(&newest, &oldest);

    // Served from cache, seeded by the mutation.
    assert_eq!(cache.fetch_story("s1").await.unwrap().id, "s1");
    assert_eq!(gateway.list_calls(), 2);
    assert_eq!(gateway.get_calls(), 0);
    assert_eq!(gateway.cover_calls(), 1);
}

#[tokio::test]
async fn test_generate_failure_writes_nothing() {
    let (gateway, cache, mutations) = setup(MockGateway::with_stories(vec![sample_story("a", 1)]));
    cache.fetch(SortOrder::Newest).await.unwrap();

    gateway.fail_next_generate(api_error(500));
    assert!(mutations.generate(sample_input()).await.is_err());

    assert_eq!(ids(&cache.peek(SortOrder::Newest).unwrap()), ["a"]);
    assert_eq!(cache.peek(SortOrder::Oldest), None);
    assert_eq!(gateway.cover_calls(), 0);
}

#[tokio::test]
async fn test_delete_invalidates_and_refetches() {
    let (gateway, cache, mutations) = setup(MockGateway::with_stories(vec![sample_story("a", 1)]));
    cache.fetch(SortOrder::Newest).await.unwrap();
    cache.fetch(SortOrder::Oldest).await.unwrap();
    mutations.generate(sample_input()).await.unwrap();
    assert_eq!(gateway.list_calls(), 2);

    mutations.remove("s1").await.unwrap();
    assert_eq!(gateway.story_ids(), ["a"]);

    let newest = cache.fetch(SortOrder::Newest).await.unwrap();
    let oldest = cache.fetch(SortOrder::Oldest).await.unwrap();
    assert_eq!(gateway.list_calls(), 4);
    assert_eq!(ids(&newest), ["a"]);
    assert_eq!(ids(&oldest), ["a"]);

    let err = cache.fetch_story("s1").await.unwrap_err();
    assert!(matches!(err, StoryError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn test_generate_then_delete_keeps_orders_in_step() {
    let (_gateway, cache, mutations) = setup(MockGateway::new());
    cache.fetch(SortOrder::Newest).await.unwrap();
    cache.fetch(SortOrder::Oldest).await.unwrap();

    for _ in 0..3 {
        mutations.generate(sample_input()).await.unwrap();
    }
    let newest = cache.peek(SortOrder::Newest).unwrap();
    let oldest = cache.peek(SortOrder::Oldest).unwrap();
    assert_eq!(ids(&newest), ["s3", "s2", "s1"]);
    assert_sorted(&newest, &oldest);

    mutations.remove("s2").await.unwrap();
    let newest = cache.fetch(SortOrder::Newest).await.unwrap();
    let oldest = cache.fetch(SortOrder::Oldest).await.unwrap();
    assert_eq!(ids(&newest), ["s3", "s1"]);
    assert_sorted(&newest, &oldest);
}

#[tokio::test]
async fn test_generate_with_one_order_cached_refetches_the_other() {
    let (gateway, cache, mutations) = setup(MockGateway::with_stories(vec![
        sample_story("a", 1),
        sample_story("b", 2),
    ]));
    cache.fetch(SortOrder::Newest).await.unwrap();

    mutations.generate(sample_input()).await.unwrap();
    assert_eq!(ids(&cache.peek(SortOrder::Newest).unwrap()), ["s1", "b", "a"]);
    assert_eq!(cache.peek(SortOrder::Oldest), None);

    let newest = cache.fetch(SortOrder::Newest).await.unwrap();
    let oldest = cache.fetch(SortOrder::Oldest).await.unwrap();
    assert_eq!(ids(&oldest), ["a", "b", "s1"]);
    assert_sorted(&newest, &oldest);
    assert_eq!(gateway.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_generate_during_pending_fetch_refetches_that_order() {
    let gateway = MockGateway::with_stories(vec![sample_story("a", 1), sample_story("b", 2)])
        .with_latency(Duration::from_millis(100));
    let (gateway, cache, mutations) = setup(gateway);
    cache.fetch(SortOrder::Newest).await.unwrap();

    // Story created at 200ms, cover at 300ms, cache updated right after.
    let generating = {
        let mutations = mutations.clone();
        tokio::spawn(async move { mutations.generate(sample_input()).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    // This listing is still pending when the cache is updated.
    let early = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch(SortOrder::Oldest).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.state(SortOrder::Oldest).is_loading);

    assert_eq!(generating.await.unwrap().unwrap().id, "s1");
    assert!(!cache.state(SortOrder::Oldest).is_fetching);

    assert!(early.await.unwrap().is_ok());
    assert_eq!(cache.peek(SortOrder::Oldest), None);

    let oldest = cache.fetch(SortOrder::Oldest).await.unwrap();
    let newest = cache.peek(SortOrder::Newest).unwrap();
    assert_eq!(ids(&oldest), ["a", "b", "s1"]);
    assert_sorted(&newest, &oldest);
    assert_eq!(gateway.list_calls(), 3);
}
