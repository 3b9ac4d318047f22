//! In-memory view of a session handed to request handlers

use serde::de::DeserializeOwned;
use serde_json::Value;
use stratum_core::{Result, SessionRecord};

/// A session bound to one request.
///
/// Mutating attributes marks the session dirty; only dirty sessions are
/// written back by [`crate::SessionManager::save_session`].
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    record: SessionRecord,
    dirty: bool,
    new: bool,
}

impl Session {
    pub(crate) fn created(id: String, record: SessionRecord) -> Self {
        Self {
            id,
            record,
            dirty: false,
            new: true,
        }
    }

    pub(crate) fn loaded(id: String, record: SessionRecord) -> Self {
        Self {
            id,
            record,
            dirty: false,
            new: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Value> {
        self.record.attributes.get(name)
    }

    /// Decode an attribute into a typed value
    pub fn get_attribute_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.record.attributes.get(name) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Set an attribute, returning the previous value
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.dirty = true;
        self.record.attributes.insert(name.into(), value.into())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        let removed = self.record.attributes.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.record.attributes.keys().map(String::as_str)
    }

    pub fn creation_time(&self) -> i64 {
        self.record.creation_time
    }

    pub fn last_access_time(&self) -> i64 {
        self.record.last_access_time
    }

    pub fn expiration_time(&self) -> i64 {
        self.record.expiration_time
    }

    /// True until the session has been saved once after creation
    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force the next save to write even without attribute changes
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn record_mut(&mut self) -> &mut SessionRecord {
        &mut self.record
    }

    pub(crate) fn mark_saved(&mut self) {
        self.dirty = false;
        self.new = false;
    }
}
