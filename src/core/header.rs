use crate::allocator::{is_reserved, END_OF_CHAIN, UNUSED_BLOCK};
use crate::error::{CfbError, Result};

pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const OOXML_SIGNATURE: [u8; 4] = *b"PK\x03\x04";
pub const HEADER_SIZE: usize = 512;
pub const MINOR_VERSION: u16 = 0x003E;
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Mini blocks are fixed at 64 bytes regardless of the main block size
pub const MINI_BLOCK_SIZE: usize = 64;
pub const MINI_BLOCK_SHIFT: u16 = 6;

/// Documents smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: usize = 4096;

/// Number of allocation-table block indices stored directly in the header
pub const HEADER_BAT_SLOTS: usize = 109;

const BAT_ARRAY_OFFSET: usize = 0x4C;

/// Main block size declared by the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSize {
    /// 512-byte blocks (major version 3)
    Small,
    /// 4096-byte blocks (major version 4)
    Large,
}

impl BlockSize {
    /// Parse the block-size exponent stored at offset 0x1E
    pub fn from_shift(shift: u16) -> Result<Self> {
        match shift {
            9 => Ok(BlockSize::Small),
            12 => Ok(BlockSize::Large),
            other => Err(CfbError::InvalidBlockSize(other)),
        }
    }

    /// Map a byte count (512 or 4096) to a block size
    pub fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            512 => Ok(BlockSize::Small),
            4096 => Ok(BlockSize::Large),
            other => Err(CfbError::Config(format!(
                "block size must be 512 or 4096, got {}",
                other
            ))),
        }
    }

    pub fn shift(self) -> u16 {
        match self {
            BlockSize::Small => 9,
            BlockSize::Large => 12,
        }
    }

    pub fn bytes(self) -> usize {
        1 << self.shift()
    }

    pub fn major_version(self) -> u16 {
        match self {
            BlockSize::Small => 3,
            BlockSize::Large => 4,
        }
    }

    /// Chain pointers held by one allocation-table block
    pub fn bat_entries_per_block(self) -> usize {
        self.bytes() / 4
    }

    /// BAT indices held by one extended allocation-table block; the last
    /// slot chains to the next XBAT block
    pub fn xbat_entries_per_block(self) -> usize {
        self.bat_entries_per_block() - 1
    }
}

/// Compound file header (first 512 bytes of the medium)
///
/// Block 0 starts immediately after the header block, so main block `n`
/// lives at byte offset `(n + 1) * block_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Main block size
    pub block_size: BlockSize,

    /// Minor format version (informational)
    pub minor_version: u16,

    /// Number of directory blocks (always 0 for 512-byte files)
    pub directory_count: u32,

    /// Total number of allocation-table blocks
    pub bat_count: u32,

    /// Directly addressed allocation-table blocks (at most 109)
    pub bat_array: Vec<u32>,

    /// First block of the property table stream
    pub property_start: u32,

    /// Transaction signature (unused, preserved)
    pub transaction_signature: u32,

    /// First block of the mini allocation table chain
    pub sbat_start: u32,

    /// Number of mini allocation-table blocks
    pub sbat_count: u32,

    /// First extended allocation-table block
    pub xbat_start: u32,

    /// Number of extended allocation-table blocks
    pub xbat_count: u32,
}

impl Header {
    /// Create a header for an empty container
    pub fn new(block_size: BlockSize) -> Self {
        Header {
            block_size,
            minor_version: MINOR_VERSION,
            directory_count: 0,
            bat_count: 0,
            bat_array: Vec::new(),
            property_start: END_OF_CHAIN,
            transaction_signature: 0,
            sbat_start: END_OF_CHAIN,
            sbat_count: 0,
            xbat_start: END_OF_CHAIN,
            xbat_count: 0,
        }
    }

    /// Check the structural fields against each other
    pub fn validate(&self) -> Result<()> {
        if self.bat_array.len() > HEADER_BAT_SLOTS {
            return Err(CfbError::InvalidHeader(format!(
                "{} direct allocation-table entries (max {})",
                self.bat_array.len(),
                HEADER_BAT_SLOTS
            )));
        }

        if let Some(&bad) = self.bat_array.iter().find(|&&at| is_reserved(at)) {
            return Err(CfbError::InvalidHeader(format!(
                "allocation-table block index {:#010x} is a reserved value",
                bad
            )));
        }

        if self.bat_count as usize > HEADER_BAT_SLOTS && self.xbat_count == 0 {
            return Err(CfbError::InvalidHeader(format!(
                "{} allocation-table blocks declared but no extended table",
                self.bat_count
            )));
        }

        Ok(())
    }

    /// Serialize header to one main block (512 header bytes, zero padded)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.block_size.bytes()];

        bytes[0..8].copy_from_slice(&SIGNATURE);
        // 0x08..0x18 header CLSID stays zero
        put_u16(&mut bytes, 0x18, self.minor_version);
        put_u16(&mut bytes, 0x1A, self.block_size.major_version());
        put_u16(&mut bytes, 0x1C, BYTE_ORDER_MARK);
        put_u16(&mut bytes, 0x1E, self.block_size.shift());
        put_u16(&mut bytes, 0x20, MINI_BLOCK_SHIFT);
        put_u32(&mut bytes, 0x28, self.directory_count);
        put_u32(&mut bytes, 0x2C, self.bat_count);
        put_u32(&mut bytes, 0x30, self.property_start);
        put_u32(&mut bytes, 0x34, self.transaction_signature);
        put_u32(&mut bytes, 0x38, MINI_STREAM_CUTOFF as u32);
        put_u32(&mut bytes, 0x3C, self.sbat_start);
        put_u32(&mut bytes, 0x40, self.sbat_count);
        put_u32(&mut bytes, 0x44, self.xbat_start);
        put_u32(&mut bytes, 0x48, self.xbat_count);

        for slot in 0..HEADER_BAT_SLOTS {
            let value = self.bat_array.get(slot).copied().unwrap_or(UNUSED_BLOCK);
            put_u32(&mut bytes, BAT_ARRAY_OFFSET + slot * 4, value);
        }

        bytes
    }

    /// Deserialize header from the first bytes of a medium
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= OOXML_SIGNATURE.len() && bytes[..4] == OOXML_SIGNATURE {
            return Err(CfbError::OfficeXmlFile);
        }

        if bytes.len() < HEADER_SIZE {
            return Err(CfbError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        if bytes[0..8] != SIGNATURE {
            return Err(CfbError::InvalidSignature);
        }

        let block_size = BlockSize::from_shift(le_u16(bytes, 0x1E))?;
        let bat_count = le_u32(bytes, 0x2C);

        let direct = (bat_count as usize).min(HEADER_BAT_SLOTS);
        let bat_array = (0..direct)
            .map(|slot| le_u32(bytes, BAT_ARRAY_OFFSET + slot * 4))
            .collect();

        let header = Header {
            block_size,
            minor_version: le_u16(bytes, 0x18),
            directory_count: le_u32(bytes, 0x28),
            bat_count,
            bat_array,
            property_start: le_u32(bytes, 0x30),
            transaction_signature: le_u32(bytes, 0x34),
            sbat_start: le_u32(bytes, 0x3C),
            sbat_count: le_u32(bytes, 0x40),
            xbat_start: le_u32(bytes, 0x44),
            xbat_count: le_u32(bytes, 0x48),
        };

        header.validate()?;

        Ok(header)
    }
}

pub(crate) fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from(le_u32(bytes, offset)) | (u64::from(le_u32(bytes, offset + 4)) << 32)
}

pub(crate) fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
