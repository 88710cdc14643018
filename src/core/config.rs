//! Options for creating and opening compound files

use crate::error::{CfbError, Result};
use crate::header::BlockSize;
use serde::{Deserialize, Serialize};

/// Filesystem options
///
/// Can be loaded from TOML:
///
/// ```
/// use cfbf_rs::Options;
///
/// let options = Options::from_toml_str("block_size = 4096\nverify_chains_on_open = true").unwrap();
/// assert_eq!(options.block_size, 4096);
/// assert!(!options.create_missing_parents);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Main block size for new containers (512 or 4096)
    pub block_size: usize,

    /// Walk every document chain when opening and fail on the first bad one
    pub verify_chains_on_open: bool,

    /// Let path-based writes create intermediate directories
    pub create_missing_parents: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            block_size: 512,
            verify_chains_on_open: false,
            create_missing_parents: true,
        }
    }
}

impl Options {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: Options =
            toml::from_str(source).map_err(|e| CfbError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| CfbError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.block_size_kind().map(|_| ())
    }

    pub fn block_size_kind(&self) -> Result<BlockSize> {
        BlockSize::from_bytes(self.block_size)
    }
}
