//! Session resumption caching.

pub mod cache;

pub use cache::{
    CachedSession, ClientSessionCache, MemoryClientCache, MemoryServerCache, ServerSessionCache,
};
