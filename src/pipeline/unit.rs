//! Unit of work: the envelope that moves through the pipeline.
//!
//! A `Unit` owns its payload and is moved from stage to stage through
//! channels, so at most one stage ever touches the payload at a time.
//! The error slot and the sidecar are reachable through `&self` and are
//! safe to use from several threads sharing a borrowed unit.

use crate::pipeline::id::UnitId;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Value stored in a unit's sidecar map.
pub type SidecarValue = Arc<dyn Any + Send + Sync>;

/// Step value of a unit no stage has processed yet.
pub const UNPROCESSED_STEP: i32 = -1;

/// A unit of work carrying a payload of type `T`.
pub struct Unit<T> {
    id: UnitId,
    payload: T,
    /// Number of stages (root included) that finished with this unit, minus one.
    step: i32,
    /// First error wins.
    err: OnceLock<anyhow::Error>,
    sidecar: RwLock<HashMap<String, SidecarValue>>,
}

impl<T> Unit<T> {
    /// Create a fresh unit with a new id and an empty sidecar.
    pub fn new(payload: T) -> Self {
        Self {
            id: UnitId::generate(),
            payload,
            step: UNPROCESSED_STEP,
            err: OnceLock::new(),
            sidecar: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub(crate) fn advance_step(&mut self) {
        self.step += 1;
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Replace the payload, returning the previous one.
    pub fn set_payload(&mut self, payload: T) -> T {
        std::mem::replace(&mut self.payload, payload)
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn err(&self) -> Option<&anyhow::Error> {
        self.err.get()
    }

    pub fn is_err(&self) -> bool {
        self.err.get().is_some()
    }

    /// Record a failure on this unit.
    ///
    /// Only the first call has an effect. Returns `true` if this call set the
    /// error.
    pub fn set_err(&self, err: impl Into<anyhow::Error>) -> bool {
        self.err.set(err.into()).is_ok()
    }

    pub fn sidecar_get(&self, key: &str) -> Option<SidecarValue> {
        let map = self.sidecar.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    /// Typed lookup; `None` if the key is missing or holds another type.
    pub fn sidecar_get_as<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        self.sidecar_get(key)
            .and_then(|value| value.downcast::<V>().ok())
    }

    pub fn sidecar_set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        let mut map = self.sidecar.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.into(), Arc::new(value));
    }

    pub fn sidecar_remove(&self, key: &str) -> Option<SidecarValue> {
        let mut map = self.sidecar.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(key)
    }

    pub fn sidecar_len(&self) -> usize {
        self.sidecar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: fmt::Debug> fmt::Display for Unit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.err() {
            Some(err) => write!(
                f,
                "{{ id: {}, step: {}, payload: {:?}, err: {} }}",
                self.id, self.step, self.payload, err
            ),
            None => write!(
                f,
                "{{ id: {}, step: {}, payload: {:?} }}",
                self.id, self.step, self.payload
            ),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Unit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("step", &self.step)
            .field("payload", &self.payload)
            .field("err", &self.err.get())
            .finish_non_exhaustive()
    }
}
