//! # Config - index settings
//!
//! All settings can be supplied through environment variables:
//!
//! ```text
//! LSM_SST_DIR         Disk component directory           (default: "data/components")
//! LSM_KEY_FIELDS      Number of leading key fields       (default: 1)
//! LSM_INCLUDE_MEM     Searches read the mutable component (default: "true")
//! LSM_VALIDATE_ORDER  Check component streams ascend     (default: "true")
//! ```
//!
//! Unparseable values fall back to the default.

use std::path::PathBuf;

pub const ENV_SST_DIR: &str = "LSM_SST_DIR";
pub const ENV_KEY_FIELDS: &str = "LSM_KEY_FIELDS";
pub const ENV_INCLUDE_MEM: &str = "LSM_INCLUDE_MEM";
pub const ENV_VALIDATE_ORDER: &str = "LSM_VALIDATE_ORDER";

const DEFAULT_SST_DIR: &str = "data/components";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory holding the disk components (`.sst` files).
    pub sst_dir: PathBuf,
    /// Number of leading tuple fields that form the key.
    pub key_fields: usize,
    /// Whether searches include the mutable in-memory component by default.
    pub include_mem_component: bool,
    /// Whether merge cursors check that every component stream is strictly
    /// ascending, failing the search with a protocol violation otherwise.
    pub validate_order: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            sst_dir: PathBuf::from(DEFAULT_SST_DIR),
            key_fields: 1,
            include_mem_component: true,
            validate_order: true,
        }
    }
}

impl IndexConfig {
    /// Config rooted at `sst_dir`, everything else default.
    pub fn with_dir<P: Into<PathBuf>>(sst_dir: P) -> Self {
        Self {
            sst_dir: sst_dir.into(),
            ..Self::default()
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let key_fields = lookup(ENV_KEY_FIELDS)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.key_fields);

        Self {
            sst_dir: lookup(ENV_SST_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.sst_dir),
            key_fields,
            include_mem_component: parse_bool(lookup(ENV_INCLUDE_MEM))
                .unwrap_or(defaults.include_mem_component),
            validate_order: parse_bool(lookup(ENV_VALIDATE_ORDER))
                .unwrap_or(defaults.validate_order),
        }
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    match v?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
