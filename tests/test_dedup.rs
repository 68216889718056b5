//! Unit tests for the request deduplicator (C10): in-flight coalescing, TTL'd
//! result caching, error-caching policy, and key derivation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shellsup::dedup::Deduplicator;

#[test]
fn test_key_for_is_deterministic_and_content_sensitive() {
    let a = Deduplicator::<i32>::key_for(r#"{"command":"echo","args":["x"]}"#);
    let b = Deduplicator::<i32>::key_for(r#"{"command":"echo","args":["x"]}"#);
    let c = Deduplicator::<i32>::key_for(r#"{"command":"echo","args":["y"]}"#);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 16);
}

#[tokio::test]
async fn test_concurrent_calls_with_same_key_share_one_execution() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_secs(10), 100, false));
    let call_count = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let dedup = Arc::clone(&dedup);
        let call_count = Arc::clone(&call_count);
        handles.push(tokio::spawn(async move {
            dedup
                .execute("shared-key".to_string(), || async {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<i32, String>(42)
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 42);
    }
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_result_reused_within_ttl() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_secs(10), 100, false));
    let call_count = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let call_count = Arc::clone(&call_count);
        let result = dedup
            .execute("key".to_string(), || async {
                call_count.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, String>(7)
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
    }

    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_cache_entry_triggers_a_fresh_call() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_millis(50), 100, false));
    let call_count = Arc::new(AtomicUsize::new(0));

    let cc = Arc::clone(&call_count);
    dedup.execute("key".to_string(), || async move {
        cc.fetch_add(1, Ordering::SeqCst);
        Ok::<i32, String>(1)
    }).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let cc = Arc::clone(&call_count);
    dedup.execute("key".to_string(), || async move {
        cc.fetch_add(1, Ordering::SeqCst);
        Ok::<i32, String>(2)
    }).await.unwrap();

    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_errors_are_not_cached_by_default() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_secs(10), 100, false));
    let call_count = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let cc = Arc::clone(&call_count);
        let result = dedup
            .execute("failing-key".to_string(), || async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err::<i32, String>("boom".to_string())
            })
            .await;
        assert_eq!(result, Err("boom".to_string()));
    }

    // include_errors is false, so each call re-executes rather than reusing
    // a cached failure.
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_include_errors_caches_failures_too() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_secs(10), 100, true));
    let call_count = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let cc = Arc::clone(&call_count);
        let result = dedup
            .execute("failing-key".to_string(), || async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err::<i32, String>("boom".to_string())
            })
            .await;
        assert_eq!(result, Err("boom".to_string()));
    }

    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sweep_evicts_expired_entries_allowing_recompute() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_millis(30), 100, false));
    let call_count = Arc::new(AtomicUsize::new(0));

    let cc = Arc::clone(&call_count);
    dedup.execute("key".to_string(), || async move {
        cc.fetch_add(1, Ordering::SeqCst);
        Ok::<i32, String>(1)
    }).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    dedup.sweep().await;

    let cc = Arc::clone(&call_count);
    dedup.execute("key".to_string(), || async move {
        cc.fetch_add(1, Ordering::SeqCst);
        Ok::<i32, String>(2)
    }).await.unwrap();

    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_different_keys_execute_independently() {
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(Duration::from_secs(10), 100, false));

    let a = dedup.execute("a".to_string(), || async { Ok::<i32, String>(1) }).await.unwrap();
    let b = dedup.execute("b".to_string(), || async { Ok::<i32, String>(2) }).await.unwrap();

    assert_eq!((a, b), (1, 2));
}
