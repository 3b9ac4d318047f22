#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stratum_core::{BackingStore, Error, Result, SessionRecord};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Transient,
    Fatal,
}

impl Failure {
    fn into_error(self, store: &str) -> Error {
        match self {
            Failure::Transient => Error::transient(store, "injected failure"),
            Failure::Fatal => Error::CorruptRecord("injected failure".to_string()),
        }
    }
}

/// In-memory store that counts calls and can be told to fail
pub struct RecordingStore {
    name: &'static str,
    entries: Mutex<HashMap<String, SessionRecord>>,
    fail_get: Mutex<Option<Failure>>,
    fail_put: Mutex<Option<Failure>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl RecordingStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            fail_get: Mutex::new(None),
            fail_put: Mutex::new(None),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_gets(&self, failure: Option<Failure>) {
        *self.fail_get.lock().unwrap() = failure;
    }

    pub fn fail_puts(&self, failure: Option<Failure>) {
        *self.fail_put.lock().unwrap() = failure;
    }

    pub fn insert_raw(&self, key: &str, record: SessionRecord) {
        self.entries.lock().unwrap().insert(key.to_string(), record);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackingStore for RecordingStore {
    fn name(&self) -> &str {
        self.name
    }

    async fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.fail_get.lock().unwrap() {
            return Err(failure.into_error(self.name));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, record: &SessionRecord) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.fail_put.lock().unwrap() {
            return Err(failure.into_error(self.name));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<Option<HashMap<String, SessionRecord>>> {
        Ok(Some(self.entries.lock().unwrap().clone()))
    }
}

/// Store that claims every key holds a live session
pub struct AlwaysExistsStore {
    pub gets: AtomicUsize,
}

impl AlwaysExistsStore {
    pub fn new() -> Self {
        Self {
            gets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BackingStore for AlwaysExistsStore {
    fn name(&self) -> &str {
        "always"
    }

    async fn get(&self, _key: &str) -> Result<Option<SessionRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(Some(SessionRecord::new(0, i64::MAX / 2)))
    }

    async fn put(&self, _key: &str, _record: &SessionRecord) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}
