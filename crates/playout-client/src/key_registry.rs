//! Key session id → key id registry
//!
//! The DRM client records the key id resolved for each key session; the
//! pipeline coordinator reads it when stamping encrypted segments whose
//! demuxer did not carry one. Explicit process-wide state: one instance
//! is created at bootstrap and shared by construction.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct KeyIdRegistry {
    entries: Mutex<HashMap<i32, Vec<u8>>>,
}

impl KeyIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key_session_id: i32, key_id: Vec<u8>) {
        self.entries.lock().unwrap().insert(key_session_id, key_id);
    }

    /// The key id for a session; empty when none is known.
    pub fn get(&self, key_session_id: i32) -> Vec<u8> {
        self.entries.lock().unwrap().get(&key_session_id).cloned().unwrap_or_default()
    }

    pub fn erase(&self, key_session_id: i32) {
        self.entries.lock().unwrap().remove(&key_session_id);
    }
}
