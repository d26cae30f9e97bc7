//! Synchronization primitives.
//!
//! Reference counts go through the [`atomic`] shim so loom can model them. Structural locks come
//! from `parking_lot` because eviction needs non-poisoning `try_lock`.
pub mod atomic;

pub use parking_lot::{Mutex, MutexGuard, RwLock};
pub use std::sync::{Arc, Weak};
