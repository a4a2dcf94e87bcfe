//! In-memory [`Store`] used by engine/dispatcher/verifier tests.
//!
//! Hand-rolled rather than generated by a mocking framework, matching the
//! corpus's convention of building small in-process test doubles directly
//! (e.g. the mcpkit transport retry tests construct real inner transports
//! rather than mock objects).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{Kind, Payload, Store};

#[derive(Debug)]
struct Entry {
    payload: Payload,
    ttl: Option<Duration>,
}

#[derive(Default)]
pub struct MockStore {
    data: Mutex<HashMap<String, Entry>>,
    pub fail_next_read: Mutex<Option<String>>,
    pub fail_next_write: Mutex<Option<String>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: impl Into<String>, payload: Payload, ttl: Option<Duration>) {
        self.data.lock().unwrap().insert(key.into(), Entry { payload, ttl });
    }

    pub fn get(&self, key: &str) -> Option<Payload> {
        self.data.lock().unwrap().get(key).map(|e| e.payload.clone())
    }

    pub fn get_ttl(&self, key: &str) -> Option<Duration> {
        self.data.lock().unwrap().get(key).and_then(|e| e.ttl)
    }

    pub fn fail_next_read_with(&self, message: impl Into<String>) {
        *self.fail_next_read.lock().unwrap() = Some(message.into());
    }

    pub fn fail_next_write_with(&self, message: impl Into<String>) {
        *self.fail_next_write.lock().unwrap() = Some(message.into());
    }
}

#[async_trait]
impl Store for MockStore {
    async fn connect(&self) -> Result<(), String> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<String>, String> {
        Ok(self.data.lock().unwrap().keys().cloned().collect())
    }

    async fn type_of(&self, key: &str) -> Result<Kind, String> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.payload.kind())
            .unwrap_or(Kind::None))
    }

    async fn read(&self, key: &str, kind: Kind) -> Result<Payload, String> {
        if let Some(msg) = self.fail_next_read.lock().unwrap().take() {
            return Err(msg);
        }
        let guard = self.data.lock().unwrap();
        match guard.get(key) {
            None => Ok(Payload::None),
            Some(entry) => {
                if entry.payload.kind() != kind {
                    return Err(format!(
                        "invalid format: observed {} disagrees with declared {}",
                        entry.payload.kind().as_str(),
                        kind.as_str()
                    ));
                }
                Ok(entry.payload.clone())
            }
        }
    }

    async fn write(&self, key: &str, payload: &Payload) -> Result<(), String> {
        if let Some(msg) = self.fail_next_write.lock().unwrap().take() {
            return Err(msg);
        }
        let mut guard = self.data.lock().unwrap();
        if payload.is_empty_collection() {
            guard.remove(key);
            return Ok(());
        }
        guard.insert(
            key.to_string(),
            Entry {
                payload: payload.clone(),
                ttl: None,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, String> {
        Ok(self.data.lock().unwrap().contains_key(key))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, String> {
        Ok(self.data.lock().unwrap().get(key).and_then(|e| e.ttl))
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<(), String> {
        if let Some(entry) = self.data.lock().unwrap().get_mut(key) {
            entry.ttl = Some(ttl);
        }
        Ok(())
    }
}
