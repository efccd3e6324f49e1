//! Lane files for the CLI.
//!
//! ```toml
//! [[lane]]
//! name = "first"
//! items = ["a", "b"]
//!
//! [[lane]]
//! items = ["c"]
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct LanesFile {
    #[serde(default)]
    lane: Vec<LaneConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaneConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub items: Vec<String>,
}

/// Parse lanes from TOML text, keeping file order.
pub fn parse(text: &str) -> Result<Vec<LaneConfig>> {
    let file: LanesFile =
        toml::from_str(text).map_err(|e| Error::Config(format!("bad lanes file: {e}")))?;
    Ok(file.lane)
}

pub fn load(path: &Path) -> Result<Vec<LaneConfig>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read lanes file {}: {e}", path.display()))
    })?;
    parse(&text)
}
