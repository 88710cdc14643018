//! Validation for entry names and paths
//!
//! Entry names are stored as at most 31 UTF-16 code units and may not contain
//! the separators that other tools use for storage paths.

use crate::error::{CfbError, Result};
use crate::property::MAX_NAME_LEN;
use regex::Regex;

/// A validated entry name
///
/// # Rules
/// - 1 to 31 UTF-16 code units
/// - No `/`, `\`, `:` or `!`
/// - No control characters other than the leading 0x01..0x05 markers used
///   by property-set streams (e.g. "\u{5}SummaryInformation")
///
/// ```
/// use cfbf_rs::EntryName;
///
/// assert!(EntryName::new("WordDocument").is_ok());
/// assert!(EntryName::new("\u{5}SummaryInformation").is_ok());
/// assert!(EntryName::new("a/b").is_err());
/// assert!(EntryName::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryName(String);

impl EntryName {
    /// Pattern for the characters allowed in a name
    const PATTERN: &'static str = r"^[\x01-\x05]?[^/\\:!\x00-\x1F]*$";

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(EntryName(name))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CfbError::InvalidName("name cannot be empty".to_string()));
        }

        let units = name.encode_utf16().count();
        if units > MAX_NAME_LEN {
            return Err(CfbError::InvalidName(format!(
                "'{}' is {} UTF-16 units long (max {})",
                name, units, MAX_NAME_LEN
            )));
        }

        let re = Regex::new(Self::PATTERN).map_err(|e| CfbError::InvalidName(e.to_string()))?;
        if !re.is_match(name) {
            return Err(CfbError::InvalidName(format!(
                "'{}' contains a reserved character (/ \\ : ! or a control character)",
                name
            )));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split a `/`-separated path into validated names
///
/// Leading, trailing and repeated separators are ignored, so `""` and `"/"`
/// both name the root.
pub fn split_path(path: &str) -> Result<Vec<EntryName>> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(EntryName::new)
        .collect()
}
