//! State document and store
//!
//! The tool's state file is decoded into an opaque JSON object. The store keeps
//! the most recent successfully decoded document and replaces it wholesale on
//! every load; a failed load leaves the previous document untouched.

use crate::errors::StateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

/// Fixed filename of the state document inside the working directory
pub const STATE_FILENAME: &str = "terraform.tfstate";

/// Decoded state: string keys mapped to arbitrary JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

impl State {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Top-level value for `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Nested lookup by RFC 6901 JSON pointer, e.g. `/resources/0/type`.
    ///
    /// The root pointer `""` is not addressable here; use [`State::as_map`].
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let path = pointer.strip_prefix('/')?;
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.0.get(&head.replace("~1", "/").replace("~0", "~"))?;
        match rest {
            Some(rest) => value.pointer(&format!("/{}", rest)),
            None => Some(value),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Open and decode a state document
#[instrument(fields(path = %path.display()))]
pub fn parse(path: &Path) -> Result<State, StateError> {
    let bytes = std::fs::read(path).map_err(|e| StateError::Missing {
        path: path.to_path_buf(),
        source: e,
    })?;

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| StateError::Decode {
        path: path.to_path_buf(),
        source: e,
    })?;

    match value {
        Value::Object(map) => {
            debug!("Decoded state with {} top-level keys", map.len());
            Ok(State(map))
        }
        _ => Err(StateError::NotAnObject {
            path: path.to_path_buf(),
        }),
    }
}

/// Holder for the latest decoded state
#[derive(Debug, Default)]
pub struct StateStore {
    current: RwLock<Option<Arc<State>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `path` and, on success, replace the held document.
    pub fn load(&self, path: &Path) -> Result<Arc<State>, StateError> {
        let state = Arc::new(parse(path)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(state)
    }

    /// The held document, `None` until the first successful load
    pub fn snapshot(&self) -> Option<Arc<State>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
