/// Cache eviction policies.
pub mod eviction;
/// Bounded object pools standing in for slab allocators.
pub mod quota;
