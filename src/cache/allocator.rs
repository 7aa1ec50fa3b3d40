//! Canonical ID Allocator
//!
//! Hands out canonical IDs from blocks reserved on the cluster-wide sequence,
//! so only one in `reserve_size` allocations pays a cluster round-trip.

use std::ops::Range;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::entry::CanonicalId;
use crate::domain::ports::AtomicSequence;
use crate::error::{Error, Result};

/// Block-reserving canonical ID allocator.
///
/// IDs are unique across every allocator sharing the sequence. Within one
/// allocator they increase; across allocators they interleave by block.
pub struct IdAllocator {
    sequence: Arc<dyn AtomicSequence>,
    reserve_size: u64,
    block: Mutex<Range<u64>>,
}

impl IdAllocator {
    pub fn new(sequence: Arc<dyn AtomicSequence>, reserve_size: u64) -> Self {
        Self {
            sequence,
            reserve_size: reserve_size.max(1),
            block: Mutex::new(0..0),
        }
    }

    /// Allocate the next canonical ID, reserving a new block when the local
    /// one is exhausted.
    #[instrument(skip(self), level = "trace")]
    pub async fn next_id(&self) -> Result<CanonicalId> {
        let mut block = self.block.lock().await;

        if block.is_empty() {
            let reserved = self
                .sequence
                .reserve(self.reserve_size)
                .await
                .map_err(|e| match e {
                    e @ Error::SequenceUnavailable(_) => e,
                    other => Error::SequenceUnavailable(other.to_string()),
                })?;

            debug!(
                sequence = %self.sequence.name(),
                start = reserved.start,
                end = reserved.end,
                "Reserved canonical ID block"
            );
            *block = reserved;
        }

        match block.next() {
            Some(id) => Ok(CanonicalId::new(id)),
            None => Err(Error::SequenceUnavailable(format!(
                "sequence '{}' returned an empty block",
                self.sequence.name()
            ))),
        }
    }

    /// IDs left in the current block
    pub async fn remaining(&self) -> u64 {
        let block = self.block.lock().await;
        block.end - block.start
    }

    pub fn reserve_size(&self) -> u64 {
        self.reserve_size
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("sequence", &self.sequence.name())
            .field("reserve_size", &self.reserve_size)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
