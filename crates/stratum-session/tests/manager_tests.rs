//! Session manager lifecycle scenarios

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{AlwaysExistsStore, Failure, RecordingStore};
use stratum_core::{BackingStore, Error, ManualClock};
use stratum_session::{Session, SessionListener, SessionManager, SessionManagerConfig, StoreChain};

const MINUTE: i64 = 60 * 1000;

struct Fixture {
    clock: Arc<ManualClock>,
    durable: Arc<RecordingStore>,
    cache: Arc<RecordingStore>,
    manager: SessionManager,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let durable = Arc::new(RecordingStore::new("durable"));
    let cache = Arc::new(RecordingStore::new("cache"));
    let chain = StoreChain::new(
        vec![
            durable.clone() as Arc<dyn BackingStore>,
            cache.clone() as Arc<dyn BackingStore>,
        ],
        clock.clone(),
    );
    let manager = SessionManager::new(chain, SessionManagerConfig::default()).unwrap();
    Fixture {
        clock,
        durable,
        cache,
        manager,
    }
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl SessionListener for EventLog {
    fn session_created(&self, session: &Session) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("created:{}", session.id()));
        Ok(())
    }

    fn session_destroyed(&self, session: &Session) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("destroyed:{}", session.id()));
        Ok(())
    }
}

#[tokio::test]
async fn test_save_and_load_round_trip() {
    let f = fixture();

    let mut session = f.manager.create_session(None).await.unwrap();
    assert!(session.is_new());
    session.set_attribute("user", "alice");
    session.set_attribute("visits", 3);
    assert!(f.manager.save_session(&mut session).await.unwrap());

    let loaded = f.manager.get_session(session.id()).await.unwrap().unwrap();
    assert!(!loaded.is_new());
    assert_eq!(loaded.get_attribute("user").unwrap(), "alice");
    assert_eq!(loaded.get_attribute_as::<u32>("visits").unwrap(), Some(3));
    assert_eq!(loaded.expiration_time(), 1_000_000 + 30 * MINUTE);
}

#[tokio::test]
async fn test_unknown_session_is_absent() {
    let f = fixture();
    assert!(f.manager.get_session("never-saved").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_session_persists_immediately() {
    let f = fixture();
    let session = f.manager.create_session(None).await.unwrap();

    let key = format!("_ahs{}", session.id());
    assert!(f.durable.contains(&key));
    assert!(f.cache.contains(&key));
}

#[tokio::test]
async fn test_sliding_expiration() {
    let f = fixture();
    let mut session = f.manager.create_session(None).await.unwrap();
    let id = session.id().to_string();

    // 29 minutes of inactivity keeps the session alive
    f.clock.advance(29 * MINUTE);
    assert!(f.manager.get_session(&id).await.unwrap().is_some());

    // A dirty save slides the deadline forward
    session.set_attribute("touched", true);
    f.manager.save_session(&mut session).await.unwrap();
    f.clock.advance(29 * MINUTE);
    assert!(f.manager.get_session(&id).await.unwrap().is_some());

    // 31 minutes without a save expires it
    f.clock.advance(2 * MINUTE);
    assert!(f.manager.get_session(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_expires_after_timeout() {
    let f = fixture();
    let session = f.manager.create_session(None).await.unwrap();

    f.clock.advance(31 * MINUTE);
    assert!(f.manager.get_session(session.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_timeout_change_applies_to_new_sessions() {
    let f = fixture();
    f.manager.set_default_timeout(5);

    let session = f.manager.create_session(None).await.unwrap();
    f.clock.advance(6 * MINUTE);
    assert!(f.manager.get_session(session.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_removes_everywhere() {
    let f = fixture();
    let log = Arc::new(EventLog::default());
    f.manager.add_session_listener(log.clone());

    let session = f.manager.create_session(None).await.unwrap();
    let id = session.id().to_string();

    f.manager.invalidate_session(&id).await.unwrap();
    assert!(f.manager.get_session(&id).await.unwrap().is_none());
    assert!(!f.durable.contains(&format!("_ahs{id}")));

    // Invalidating again is harmless and does not notify twice
    f.manager.invalidate_session(&id).await.unwrap();

    assert_eq!(
        *log.events.lock().unwrap(),
        vec![format!("created:{id}"), format!("destroyed:{id}")]
    );
}

#[tokio::test]
async fn test_id_generation_gives_up() {
    let always = Arc::new(AlwaysExistsStore::new());
    let chain = StoreChain::new(
        vec![always.clone() as Arc<dyn BackingStore>],
        Arc::new(ManualClock::new(0)),
    );
    let manager = SessionManager::new(chain, SessionManagerConfig::default()).unwrap();

    let err = manager.create_session(None).await.unwrap_err();
    assert!(matches!(err, Error::IdSpaceExhausted { attempts: 100 }));
    assert!(err.is_fatal());
    assert_eq!(always.gets.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn test_corrupt_cache_tier_does_not_block_sessions() {
    let f = fixture();
    let existing = f.manager.create_session(None).await.unwrap();
    f.cache.fail_gets(Some(Failure::Fatal));

    let loaded = f.manager.get_session(existing.id()).await.unwrap();
    assert_eq!(loaded.map(|s| s.id().to_string()), Some(existing.id().to_string()));
    assert!(f.durable.gets() >= 1);

    let fresh = f.manager.create_session(None).await.unwrap();
    assert!(f.durable.contains(&format!("_ahs{}", fresh.id())));
}

#[tokio::test]
async fn test_failed_save_keeps_session_dirty() {
    let f = fixture();
    let mut session = f.manager.create_session(None).await.unwrap();
    session.set_attribute("k", "v");

    f.durable.fail_puts(Some(Failure::Transient));
    let cache_puts = f.cache.puts();
    let err = f.manager.save_session(&mut session).await.unwrap_err();

    assert!(err.is_transient());
    assert!(session.is_dirty());
    assert_eq!(f.cache.puts(), cache_puts);

    f.durable.fail_puts(None);
    assert!(f.manager.save_session(&mut session).await.unwrap());
}

#[tokio::test]
async fn test_get_all_sessions() {
    let f = fixture();
    let a = f.manager.create_session(None).await.unwrap();
    let b = f.manager.create_session(Some("fixed-id")).await.unwrap();

    let all = f.manager.get_all_sessions().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.contains(a.id()));
    assert!(all.contains(b.id()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_persist_one_whole_state() {
    let f = fixture();
    let manager = Arc::new(f.manager);
    let session = manager.create_session(None).await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..8 {
        let manager = manager.clone();
        let mut copy = session.clone();
        handles.push(tokio::spawn(async move {
            copy.set_attribute("a", writer);
            copy.set_attribute("b", writer);
            manager.save_session(&mut copy).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let loaded = manager.get_session(session.id()).await.unwrap().unwrap();
    let a = loaded.get_attribute("a").unwrap();
    let b = loaded.get_attribute("b").unwrap();
    assert_eq!(a, b);
}
