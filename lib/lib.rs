//! kvfs shared library: a kernel-style virtual filesystem core.

/// Caching primitives: LRU zones and allocation pools.
pub mod cache;
/// Tunables and their TOML loader.
pub mod config;
/// The virtual filesystem: caches, path walker, mounts and the syscall layer.
pub mod fs;
/// Synchronisation primitives, switched to `loom` under `cfg(loom)`.
pub mod sync;
