/// Recency-ordered eviction zones.
pub mod lru;
