//! # Run context
//!
//! A [`RunContext`] carries a caller-owned value of any type through a run.
//! Instruction policies, tools and handoff callbacks read and update it; the
//! oracle never sees it. Cloning a `RunContext` clones the handle, not the
//! value, so every participant of a run observes the same state.
//!
//! ```rust
//! use agents_runtime::RunContext;
//!
//! #[derive(Default, Clone)]
//! struct Visits {
//!     count: u32,
//! }
//!
//! let ctx = RunContext::new(Visits::default());
//! let handle = ctx.clone();
//! handle.update(|v| v.count += 1);
//! assert_eq!(ctx.read(|v| v.count), 1);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, mutable per-run state.
pub struct RunContext<C = ()> {
    inner: Arc<Mutex<C>>,
}

impl<C> RunContext<C> {
    pub fn new(value: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    // Poisoning is recovered: a panicking tool leaves the value readable.
    fn lock(&self) -> MutexGuard<'_, C> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` with shared access to the value.
    pub fn read<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.lock())
    }

    /// Runs `f` with exclusive access to the value.
    pub fn update<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.lock())
    }

    /// Replaces the value, returning the previous one.
    pub fn replace(&self, value: C) -> C {
        std::mem::replace(&mut *self.lock(), value)
    }

    /// Whether both handles point at the same value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl RunContext<()> {
    /// A context for runs that carry no state.
    pub fn empty() -> Self {
        Self::new(())
    }
}

impl<C: Clone> RunContext<C> {
    /// A copy of the current value.
    pub fn snapshot(&self) -> C {
        self.read(C::clone)
    }
}

impl<C> Clone for RunContext<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Default> Default for RunContext<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C: fmt::Debug> fmt::Debug for RunContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|value| f.debug_tuple("RunContext").field(value).finish())
    }
}

impl<C> From<C> for RunContext<C> {
    fn from(value: C) -> Self {
        Self::new(value)
    }
}
