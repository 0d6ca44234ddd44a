//! Cache Entry Types
//!
//! An L1 entry is the encoded value plus access metadata used by the
//! eviction policy. Entries expire a fixed time after insertion (expire after
//! write); reads do not extend their life.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Metadata for cache entries
#[derive(Debug)]
pub struct EntryMetadata {
    /// Insertion time
    inserted_at: Instant,
    /// Time-to-live from insertion
    ttl: Duration,
    /// Last access, in milliseconds since insertion
    last_access_ms: AtomicU64,
    /// Access count for frequency-based eviction
    access_count: AtomicU32,
}

impl EntryMetadata {
    /// Create new entry metadata
    pub fn new(ttl: Duration) -> Self {
        Self {
            inserted_at: Instant::now(),
            ttl,
            last_access_ms: AtomicU64::new(0),
            access_count: AtomicU32::new(1),
        }
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u32 {
        let now_ms = self.inserted_at.elapsed().as_millis() as u64;
        self.last_access_ms.fetch_max(now_ms, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get access count
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Time since insertion
    #[inline]
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// Time since the last access (or insertion)
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.age().saturating_sub(last)
    }

    /// Configured time-to-live
    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }
}

/// Cache entry containing encoded data and metadata
pub struct CacheEntry {
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Encoded value, shared with L2 writes without copying
    data: Bytes,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(data: Bytes, ttl: Duration) -> Self {
        Self {
            metadata: EntryMetadata::new(ttl),
            data,
        }
    }

    /// Get data (zero-copy)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Get data size
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Record access
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.metadata.record_access()
    }

    /// Check if expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.size())
            .field("access_count", &self.metadata.access_count())
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
