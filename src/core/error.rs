use thiserror::Error;

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("Invalid header signature: not a compound file")]
    InvalidSignature,

    #[error("The supplied data appears to be an Office Open XML (zip) file, not a compound file")]
    OfficeXmlFile,

    #[error("Unsupported block size exponent: {0} (expected 9 or 12)")]
    InvalidBlockSize(u16),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Corrupt property record {index}: {reason}")]
    CorruptProperty { index: u32, reason: String },

    #[error("Block index {0:#x} is outside the allocation table")]
    InvalidBlockIndex(u32),

    #[error("Corrupt chain: block {block} is followed by reserved value {next:#010x}")]
    CorruptChain { block: u32, next: u32 },

    #[error("Potential loop detected: block {block} was already claimed but was just requested again")]
    ChainLoop { block: u32 },

    #[error("Block {block} is claimed by more than one chain")]
    CrossLinkedBlock { block: u32 },

    #[error("Chain of '{name}' holds {actual} blocks but its size needs {expected}")]
    ShortChain {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Tried to write too much data: limit is {limit} bytes, write would reach {attempted}")]
    CapacityExceeded { limit: u64, attempted: u64 },

    #[error("Cannot perform requested operation on a closed stream")]
    StreamClosed,

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    DuplicateName(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a document: {0}")]
    NotADocument(String),

    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    #[error("Container was opened read-only")]
    ReadOnly,

    #[error("Invalid options: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CfbError>;

impl From<CfbError> for std::io::Error {
    fn from(err: CfbError) -> Self {
        use std::io::ErrorKind;

        match err {
            CfbError::Io(e) => e,
            other => {
                let kind = match &other {
                    CfbError::NotFound(_) => ErrorKind::NotFound,
                    CfbError::CapacityExceeded { .. } | CfbError::InvalidName(_) => {
                        ErrorKind::InvalidInput
                    }
                    CfbError::ReadOnly => ErrorKind::PermissionDenied,
                    _ => ErrorKind::InvalidData,
                };
                std::io::Error::new(kind, other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: std::io::Error = CfbError::NotFound("WordDocument".into()).into();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

        let err: std::io::Error = CfbError::CapacityExceeded {
            limit: 10,
            attempted: 11,
        }
        .into();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<CfbError>())
            .is_some());
    }

    #[test]
    fn test_io_error_passes_through() {
        let original = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err: std::io::Error = CfbError::Io(original).into();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
