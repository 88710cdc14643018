//! One block's worth of allocation-table entries
//!
//! Used for BAT, XBAT and SBAT blocks alike. An XBAT block reserves its final
//! entry as the link to the next XBAT block.

use crate::allocator::{END_OF_CHAIN, UNUSED_BLOCK};
use crate::header::{le_u32, put_u32};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTable {
    /// Chain pointers (or BAT indices, for XBAT blocks)
    values: Vec<u32>,

    /// Cached "some slot is UNUSED" flag
    has_free_slots: bool,

    /// Main-store block holding this table
    location: u32,
}

impl AllocationTable {
    /// Create an all-free table with `entries` slots
    pub fn empty(entries: usize, is_xbat: bool, location: u32) -> Self {
        let mut values = vec![UNUSED_BLOCK; entries];
        if is_xbat {
            if let Some(last) = values.last_mut() {
                *last = END_OF_CHAIN;
            }
        }

        AllocationTable {
            values,
            has_free_slots: true,
            location,
        }
    }

    /// Parse a table from a block's bytes
    pub fn from_bytes(bytes: &[u8], location: u32) -> Self {
        let values: Vec<u32> = (0..bytes.len() / 4).map(|i| le_u32(bytes, i * 4)).collect();
        let has_free_slots = values.contains(&UNUSED_BLOCK);

        AllocationTable {
            values,
            has_free_slots,
            location,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.values.len() * 4];
        for (i, &value) in self.values.iter().enumerate() {
            put_u32(&mut bytes, i * 4, value);
        }
        bytes
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, slot: usize) -> u32 {
        self.values[slot]
    }

    pub fn set_value(&mut self, slot: usize, value: u32) {
        let old = self.values[slot];
        self.values[slot] = value;

        if value == UNUSED_BLOCK {
            self.has_free_slots = true;
        } else if old == UNUSED_BLOCK {
            self.has_free_slots = self.values.contains(&UNUSED_BLOCK);
        }
    }

    pub fn has_free_slots(&self) -> bool {
        self.has_free_slots
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        if !self.has_free_slots {
            return None;
        }
        self.values.iter().position(|&v| v == UNUSED_BLOCK)
    }

    pub fn free_slot_count(&self) -> usize {
        self.values.iter().filter(|&&v| v == UNUSED_BLOCK).count()
    }

    /// One past the highest slot in use (0 when every slot is free)
    pub fn occupied_len(&self) -> usize {
        self.values
            .iter()
            .rposition(|&v| v != UNUSED_BLOCK)
            .map_or(0, |pos| pos + 1)
    }

    pub fn location(&self) -> u32 {
        self.location
    }

    /// Next XBAT block (XBAT tables only)
    pub fn next_xbat(&self) -> u32 {
        self.values.last().copied().unwrap_or(END_OF_CHAIN)
    }

    pub fn set_next_xbat(&mut self, next: u32) {
        let last = self.values.len() - 1;
        self.set_value(last, next);
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }
}
