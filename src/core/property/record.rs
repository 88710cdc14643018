//! 128-byte property records

use crate::allocator::{END_OF_CHAIN, UNUSED_BLOCK};
use crate::error::{CfbError, Result};
use crate::header::{le_u16, le_u32, le_u64, put_u16, put_u32, put_u64, BlockSize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

/// Size of one serialized property record
pub const PROPERTY_SIZE: usize = 128;

/// Longest entry name, in UTF-16 code units (excluding the terminator)
pub const MAX_NAME_LEN: usize = 31;

/// Sibling/child pointer meaning "none"
pub const NO_INDEX: u32 = UNUSED_BLOCK;

/// Name of the root entry
pub const ROOT_NAME: &str = "Root Entry";

const NAME_FIELD: usize = 64;
const COLOR_BLACK: u8 = 1;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Arena index of a property
pub type PropertyId = usize;

/// Kind of directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// A storage: holds other entries
    Directory,
    /// A stream: holds bytes
    Document,
    /// The root storage; also owns the mini stream
    Root,
}

impl PropertyKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PropertyKind::Directory),
            2 => Some(PropertyKind::Document),
            5 => Some(PropertyKind::Root),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PropertyKind::Directory => 1,
            PropertyKind::Document => 2,
            PropertyKind::Root => 5,
        }
    }

    /// Can this kind hold children
    pub fn is_container(self) -> bool {
        !matches!(self, PropertyKind::Document)
    }
}

/// A directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
    pub clsid: [u8; 16],
    pub state_bits: u32,

    /// Creation time as a Windows FILETIME (0 when unset)
    pub created: u64,

    /// Modification time as a Windows FILETIME (0 when unset)
    pub modified: u64,

    /// First block of the content chain
    pub start_block: u32,

    /// Content length in bytes
    pub size: u64,

    /// Persisted tree links, as read from disk
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) child: u32,

    /// Children ordered by [`compare_names`]
    pub(crate) children: Vec<PropertyId>,
    pub(crate) parent: Option<PropertyId>,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Property {
            name: name.into(),
            kind,
            clsid: [0u8; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_block: END_OF_CHAIN,
            size: 0,
            left: NO_INDEX,
            right: NO_INDEX,
            child: NO_INDEX,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn root() -> Self {
        Property::new(ROOT_NAME, PropertyKind::Root)
    }

    pub fn is_document(&self) -> bool {
        self.kind == PropertyKind::Document
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.created)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modified)
    }

    /// Parse one record
    ///
    /// Returns `Ok(None)` for unused records and for record types this crate
    /// does not model.
    pub fn from_bytes(bytes: &[u8], index: u32, block_size: BlockSize) -> Result<Option<Self>> {
        let kind_byte = bytes[0x42];
        if kind_byte == 0 {
            return Ok(None);
        }

        let kind = match PropertyKind::from_byte(kind_byte) {
            Some(kind) => kind,
            None => {
                warn!("Skipping property {} with unknown type {}", index, kind_byte);
                return Ok(None);
            }
        };

        let name_bytes = le_u16(bytes, 0x40) as usize;
        if name_bytes > NAME_FIELD {
            return Err(CfbError::CorruptProperty {
                index,
                reason: format!("name length {} exceeds {} bytes", name_bytes, NAME_FIELD),
            });
        }

        let units: Vec<u16> = (0..(name_bytes / 2).saturating_sub(1))
            .map(|i| le_u16(bytes, i * 2))
            .take_while(|&unit| unit != 0)
            .collect();
        let name = String::from_utf16_lossy(&units);

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&bytes[0x50..0x60]);

        let size = match block_size {
            BlockSize::Large => le_u64(bytes, 0x78),
            BlockSize::Small => {
                let high = le_u32(bytes, 0x7C);
                if high != 0 {
                    warn!(
                        "Property {} has non-zero upper size bytes ({:#x}) in a 512-byte file",
                        index, high
                    );
                }
                u64::from(le_u32(bytes, 0x78))
            }
        };

        Ok(Some(Property {
            name,
            kind,
            clsid,
            state_bits: le_u32(bytes, 0x60),
            created: le_u64(bytes, 0x64),
            modified: le_u64(bytes, 0x6C),
            start_block: le_u32(bytes, 0x74),
            size,
            left: le_u32(bytes, 0x44),
            right: le_u32(bytes, 0x48),
            child: le_u32(bytes, 0x4C),
            children: Vec::new(),
            parent: None,
        }))
    }

    /// Serialize with the given tree links
    pub fn to_bytes(&self, block_size: BlockSize, left: u32, right: u32, child: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; PROPERTY_SIZE];

        let units: Vec<u16> = self.name.encode_utf16().take(MAX_NAME_LEN).collect();
        for (i, &unit) in units.iter().enumerate() {
            put_u16(&mut bytes, i * 2, unit);
        }
        put_u16(&mut bytes, 0x40, ((units.len() + 1) * 2) as u16);

        bytes[0x42] = self.kind.to_byte();
        bytes[0x43] = COLOR_BLACK;
        put_u32(&mut bytes, 0x44, left);
        put_u32(&mut bytes, 0x48, right);
        put_u32(&mut bytes, 0x4C, child);
        bytes[0x50..0x60].copy_from_slice(&self.clsid);
        put_u32(&mut bytes, 0x60, self.state_bits);
        put_u64(&mut bytes, 0x64, self.created);
        put_u64(&mut bytes, 0x6C, self.modified);
        put_u32(&mut bytes, 0x74, self.start_block);

        match block_size {
            BlockSize::Large => put_u64(&mut bytes, 0x78, self.size),
            BlockSize::Small => put_u32(&mut bytes, 0x78, self.size as u32),
        }

        bytes
    }

    /// An unused record slot
    pub fn empty_record() -> Vec<u8> {
        let mut bytes = vec![0u8; PROPERTY_SIZE];
        put_u32(&mut bytes, 0x44, NO_INDEX);
        put_u32(&mut bytes, 0x48, NO_INDEX);
        put_u32(&mut bytes, 0x4C, NO_INDEX);
        bytes
    }
}

/// Sibling order: shorter names first, then case-insensitive, then exact
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let len_a = a.encode_utf16().count();
    let len_b = b.encode_utf16().count();

    len_a
        .cmp(&len_b)
        .then_with(|| a.to_uppercase().cmp(&b.to_uppercase()))
        .then_with(|| a.cmp(b))
}

pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / FILETIME_TICKS_PER_SECOND) as i64 - FILETIME_UNIX_OFFSET;
    let nanos = ((filetime % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp() + FILETIME_UNIX_OFFSET;
    if secs < 0 {
        return 0;
    }
    secs as u64 * FILETIME_TICKS_PER_SECOND + u64::from(time.timestamp_subsec_nanos()) / 100
}
