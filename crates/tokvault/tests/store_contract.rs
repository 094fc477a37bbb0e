//! Backend-generic contract tests: every store must satisfy the same
//! round-trip, expiration, and idempotence properties.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokvault::{
    Error, FileStore, MemoryStore, SessionData, SessionStore, ShardedMemoryStore, Value,
};

fn sample(token: &str) -> SessionData {
    let mut data = SessionData::with_token(token);
    data.id = 1;
    data.account = "alice".to_string();
    data.state = 2;
    data.roles = vec!["admin".to_string(), "user".to_string()].into();
    data.set("plan", "pro");
    data.set("visits", 3i64);
    data
}

/// The backends under test. The file store lives in a temp dir owned by the
/// returned guard.
fn backends() -> (tempfile::TempDir, Vec<(&'static str, Arc<dyn SessionStore>)>) {
    let dir = tempfile::tempdir().unwrap();
    let stores: Vec<(&'static str, Arc<dyn SessionStore>)> = vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("sharded", Arc::new(ShardedMemoryStore::new(8))),
        ("file", Arc::new(FileStore::new(dir.path()).unwrap())),
    ];
    (dir, stores)
}

#[tokio::test]
async fn save_then_get_round_trips() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut data = sample(&format!("{name}-token"));
        store.save(&mut data, None).await.unwrap();

        let back = store.get(&data.token).await.unwrap();
        assert_eq!(back, data, "{name}: data must round-trip unchanged");
        assert_eq!(
            back.get("plan"),
            Some(&Value::Str("pro".to_string())),
            "{name}"
        );
    }
}

#[tokio::test]
async fn ttl_lapse_yields_expired_then_not_found() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut data = sample("short");
        store
            .save(&mut data, Some(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(store.get("short").await.is_ok(), "{name}: fresh record");
        sleep(Duration::from_millis(80)).await;

        assert!(
            matches!(store.get("short").await, Err(Error::Expired)),
            "{name}: first read after lapse is Expired"
        );
        assert!(
            matches!(store.get("short").await, Err(Error::NotFound)),
            "{name}: the expired read purged the record"
        );
    }
}

#[tokio::test]
async fn oversized_ttl_saves_a_record_that_never_expires() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut data = sample("forever");
        store.save(&mut data, Some(Duration::MAX)).await.unwrap();

        assert_eq!(
            store.get("forever").await.unwrap().account,
            "alice",
            "{name}: a lifetime past the clock's range means no expiry"
        );
    }
}

#[tokio::test]
async fn clear_is_idempotent_for_present_and_absent_tokens() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut data = sample("gone");
        store.save(&mut data, None).await.unwrap();

        store.clear("gone").await.unwrap();
        assert!(
            matches!(store.get("gone").await, Err(Error::NotFound)),
            "{name}"
        );
        store.clear("gone").await.unwrap();
        store.clear("never-was").await.unwrap();
    }
}

#[tokio::test]
async fn empty_token_is_minted_and_retrievable() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut data = SessionData::new();
        data.id = 11;
        store.save(&mut data, None).await.unwrap();

        assert!(!data.token.is_empty(), "{name}: token written back");
        assert_eq!(store.get(&data.token).await.unwrap().id, 11, "{name}");
    }
}

#[tokio::test]
async fn end_to_end_expiration_scenario() {
    let (_dir, stores) = backends();
    for (name, store) in stores {
        let mut data = SessionData::with_token("e2e");
        data.id = 1;
        data.account = "alice".to_string();
        store
            .save(&mut data, Some(Duration::from_secs(1)))
            .await
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        let back = store.get("e2e").await.unwrap();
        assert_eq!((back.id, back.account.as_str()), (1, "alice"), "{name}");

        sleep(Duration::from_millis(1200)).await;
        assert!(matches!(store.get("e2e").await, Err(Error::Expired)), "{name}");
        assert!(matches!(store.get("e2e").await, Err(Error::NotFound)), "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_save_get_never_tears() {
    let stores: Vec<(&'static str, Arc<dyn SessionStore>)> = vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("sharded", Arc::new(ShardedMemoryStore::new(8))),
    ];

    for (name, store) in stores {
        let mut handles = Vec::new();
        // 8 writers x 4 overlapping tokens: every saved record couples the
        // id and account so a torn read would be visible.
        for writer in 0..8u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..100u64 {
                    let token = format!("tok-{}", round % 4);
                    let mut data = SessionData::with_token(&token);
                    data.id = writer * 1000 + round;
                    data.account = format!("acct-{}", data.id);
                    store.save(&mut data, None).await.unwrap();
                    match store.get(&token).await {
                        Ok(seen) => {
                            assert_eq!(
                                seen.account,
                                format!("acct-{}", seen.id),
                                "torn record observed"
                            );
                        }
                        Err(Error::NotFound) | Err(Error::Expired) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Final state of every token is some legitimately saved value.
        for round in 0..4 {
            let seen = store.get(&format!("tok-{round}")).await.unwrap();
            assert_eq!(seen.account, format!("acct-{}", seen.id), "{name}");
        }
    }
}

#[tokio::test]
async fn sharded_distribution_is_roughly_uniform() {
    let store = ShardedMemoryStore::new(16);
    let count = 4000;
    for i in 0..count {
        let mut data = SessionData::with_token(format!("session-token-{i}"));
        store.save(&mut data, None).await.unwrap();
    }

    let sizes = store.shard_sizes();
    assert_eq!(sizes.iter().sum::<usize>(), count);
    let mean = count / sizes.len();
    for (shard, size) in sizes.iter().enumerate() {
        assert!(
            *size <= 2 * mean,
            "shard {shard} holds {size}, more than twice the mean {mean}"
        );
    }
}
