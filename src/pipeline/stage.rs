//! Stage abstraction: one link of the processing chain.
//!
//! A stage wraps a single processing function. The function receives the
//! unit by mutable reference and either updates the payload or records an
//! error on the unit; the stage itself never fails.

use crate::pipeline::unit::Unit;
use std::fmt;
use std::sync::Arc;

/// Shared processing function of a stage.
pub type StageFn<T> = Arc<dyn Fn(&mut Unit<T>) + Send + Sync>;

/// A single processing stage.
pub struct Stage<T> {
    name: Option<String>,
    func: StageFn<T>,
}

impl<T> Stage<T> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut Unit<T>) + Send + Sync + 'static,
    {
        Self {
            name: None,
            func: Arc::new(func),
        }
    }

    /// Create a stage with a name used in log output.
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Unit<T>) + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            func: Arc::new(func),
        }
    }

    /// The sentinel that heads every chain.
    pub fn noop() -> Self
    where
        T: 'static,
    {
        Self::named("root", |_: &mut Unit<T>| {})
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("stage")
    }

    /// Invoke the wrapped function on `unit`.
    #[inline]
    pub fn run(&self, unit: &mut Unit<T>) {
        (self.func)(unit)
    }
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name()).finish()
    }
}

/// Run `first`, then `second` unless `first` recorded an error.
pub fn compose<T: 'static, A, B>(first: A, second: B) -> impl Fn(&mut Unit<T>) + Send + Sync + 'static
where
    A: Fn(&mut Unit<T>) + Send + Sync + 'static,
    B: Fn(&mut Unit<T>) + Send + Sync + 'static,
{
    move |unit: &mut Unit<T>| {
        first(unit);
        if !unit.is_err() {
            second(unit);
        }
    }
}

/// Run every function in order, stopping at the first one that records an error.
pub fn sequence<T: 'static>(funcs: Vec<StageFn<T>>) -> impl Fn(&mut Unit<T>) + Send + Sync + 'static {
    move |unit: &mut Unit<T>| {
        for func in &funcs {
            func(unit);
            if unit.is_err() {
                break;
            }
        }
    }
}
