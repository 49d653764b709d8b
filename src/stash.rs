//! Entry stash: the retry buffer between sensor download and cloud publish.
//!
//! ```text
//!  0          23                                   len        capacity
//!  ┌──────────┬────────┬────────┬────────┬─────────┬──────────┐
//!  │ Publish  │ entry0 │ entry1 │ entry2 │   ...   │  (free)  │
//!  │ header   │        │        │        │         │          │
//!  └──────────┴────────┴────────┴────────┴─────────┴──────────┘
//!             ▲ idx (drain read cursor)
//! ```
//!
//! The header is written once, when the first entry lands in an empty
//! stash. Entry sizes are kept in a side table keyed by offset so the
//! drain can step through entries without trusting bytes inside them.

use log::{debug, info, warn};

use crate::datalog::{ENTRY_START_BYTE, MAX_ENTRY_SIZE, PUBLISH_HEADER_SIZE};
use crate::error::StashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: usize,
    size: usize,
}

/// Bounded append buffer of `[PublishHeader][entry]*`.
pub struct EntryStash {
    buffer: Vec<u8>,
    /// Download buffer size; an entry fits while `len + header + size < limit`.
    limit: usize,
    slots: Vec<Slot>,
    available: bool,
    len: usize,
    idx: usize,
    timeouts: u32,
    failure_cnt: u32,
    prev_ent_size: usize,
}

impl EntryStash {
    /// `limit` is the log download buffer size; storage holds that plus
    /// one publish header.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: vec![0; limit + PUBLISH_HEADER_SIZE],
            limit,
            slots: Vec::new(),
            available: false,
            len: 0,
            idx: 0,
            timeouts: 0,
            failure_cnt: 0,
            prev_ent_size: 0,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// No entries held (a lone header counts as empty).
    pub fn is_empty(&self) -> bool {
        self.len <= PUBLISH_HEADER_SIZE
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn entry_count(&self) -> usize {
        self.slots.len()
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn failure_cnt(&self) -> u32 {
        self.failure_cnt
    }

    pub fn prev_ent_size(&self) -> usize {
        self.prev_ent_size
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The stored publish header; empty until the first append.
    pub fn header(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            &self.buffer[..PUBLISH_HEADER_SIZE]
        }
    }

    // ── Download side ─────────────────────────────────────────

    /// Whether an entry of `size` bytes would be accepted.
    pub fn fits(&self, size: usize) -> bool {
        self.len + PUBLISH_HEADER_SIZE + size < self.limit
    }

    /// Append `entry`, writing `header` first if the stash is empty.
    ///
    /// On `Full` nothing is modified.
    pub fn append(
        &mut self,
        header: &[u8; PUBLISH_HEADER_SIZE],
        entry: &[u8],
    ) -> Result<(), StashError> {
        if !self.fits(entry.len()) {
            return Err(StashError::Full);
        }
        if self.len == 0 {
            self.buffer[..PUBLISH_HEADER_SIZE].copy_from_slice(header);
            self.len = PUBLISH_HEADER_SIZE;
            self.idx = PUBLISH_HEADER_SIZE;
        }
        let offset = self.len;
        self.buffer[offset..offset + entry.len()].copy_from_slice(entry);
        self.slots.push(Slot {
            offset,
            size: entry.len(),
        });
        self.len += entry.len();
        self.prev_ent_size = entry.len();
        debug!("Stash: +{} bytes (len {})", entry.len(), self.len);
        Ok(())
    }

    /// Undo the most recent append after its publish was confirmed.
    pub fn rollback_last(&mut self) {
        if let Some(slot) = self.slots.pop() {
            self.len = slot.offset;
            debug!("Stash: -{} bytes (len {})", slot.size, self.len);
        }
    }

    /// Flag stashed entries for the drain task. No-op while empty.
    pub fn mark_available(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        if !self.available {
            info!("Stash: {} entries pending ({} bytes)", self.slots.len(), self.len);
        }
        self.available = true;
        true
    }

    // ── Drain side ────────────────────────────────────────────

    /// Entry at the read cursor, or `None` if the cursor does not sit on
    /// a well-formed entry.
    pub fn entry_at_idx(&self) -> Option<&[u8]> {
        let slot = self.slots.iter().find(|s| s.offset == self.idx)?;
        let valid = slot.size <= MAX_ENTRY_SIZE
            && self.idx + slot.size <= self.len
            && self.buffer[self.idx] == ENTRY_START_BYTE;
        if !valid {
            warn!("Stash: corrupt entry at idx {}", self.idx);
            return None;
        }
        Some(&self.buffer[self.idx..self.idx + slot.size])
    }

    /// Remember the size of the entry just handed to the publisher.
    pub fn set_prev_ent_size(&mut self, size: usize) {
        self.prev_ent_size = size;
    }

    /// Move the read cursor past the previously drained entry.
    pub fn advance(&mut self) {
        self.idx = (self.idx + self.prev_ent_size).min(self.len);
        self.failure_cnt = 0;
    }

    pub fn caught_up(&self) -> bool {
        self.idx >= self.len
    }

    pub fn record_timeout(&mut self) -> u32 {
        self.timeouts += 1;
        self.timeouts
    }

    pub fn clear_timeouts(&mut self) {
        self.timeouts = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.failure_cnt += 1;
        self.failure_cnt
    }

    /// Zero the buffer, cursors and counters.
    pub fn reset(&mut self) {
        self.buffer.fill(0);
        self.slots.clear();
        self.available = false;
        self.len = 0;
        self.idx = 0;
        self.timeouts = 0;
        self.failure_cnt = 0;
        self.prev_ent_size = 0;
        debug!("Stash: reset");
    }
}
