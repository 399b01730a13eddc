use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::content::MAX_MASK_BITS;
use crate::error::LedgerError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub fork: ForkConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Weight lead required before a block is finalized.
    #[serde(default = "default_finalized_weight")]
    pub finalized_weight: u64,
    #[serde(default)]
    pub record_history: bool,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            finalized_weight: default_finalized_weight(),
            record_history: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_min_num_chains")]
    pub min_num_chains: usize,
    #[serde(default = "default_max_num_chains")]
    pub max_num_chains: usize,
    /// Deepest split level; bounds how long CENTER content can keep moving.
    #[serde(default = "default_max_mask_depth")]
    pub max_mask_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            min_num_chains: default_min_num_chains(),
            max_num_chains: default_max_num_chains(),
            max_mask_depth: default_max_mask_depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u64,
    #[serde(default = "default_safety_offset")]
    pub safety_offset: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            safety_offset: default_safety_offset(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Finalized blocks an ephemeral chain needs before it is offered to
    /// proposers.
    #[serde(default = "default_min_finalized_blocks")]
    pub min_finalized_blocks: u64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            min_finalized_blocks: default_min_finalized_blocks(),
        }
    }
}

impl LedgerConfig {
    /// Parse a TOML document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ConfigParse`] on malformed TOML, or the error
    /// from [`validate`](Self::validate).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|err| LedgerError::ConfigParse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the tree cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.fork.finalized_weight == 0 {
            return Err(LedgerError::InvalidConfig(
                "fork.finalized_weight must be at least 1".into(),
            ));
        }
        if self.tree.min_num_chains == 0 {
            return Err(LedgerError::InvalidConfig(
                "tree.min_num_chains must be at least 1 (the root)".into(),
            ));
        }
        if self.tree.min_num_chains > self.tree.max_num_chains {
            return Err(LedgerError::InvalidConfig(format!(
                "tree.min_num_chains ({}) exceeds tree.max_num_chains ({})",
                self.tree.min_num_chains, self.tree.max_num_chains
            )));
        }
        // Chain ids number the tree heap-style in a u64.
        let depth_limit = MAX_MASK_BITS.min(63);
        if self.tree.max_mask_depth > depth_limit {
            return Err(LedgerError::InvalidConfig(format!(
                "tree.max_mask_depth ({}) exceeds {depth_limit}",
                self.tree.max_mask_depth
            )));
        }
        if self.content.safety_offset >= self.content.max_batch_size {
            return Err(LedgerError::InvalidConfig(
                "content.safety_offset must be below content.max_batch_size".into(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a ledger config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<LedgerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    LedgerConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to load {}", path.display()))
}

/// Load `<config dir>/arbor/ledger.toml`, or defaults when it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<LedgerConfig> {
    dirs::config_dir().map_or_else(|| Ok(LedgerConfig::default()), |dir| load_from_config_dir(&dir))
}

/// Load `<config_dir>/arbor/ledger.toml`, or defaults when it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_from_config_dir(config_dir: &Path) -> Result<LedgerConfig> {
    let path = config_dir.join("arbor/ledger.toml");
    if !path.exists() {
        return Ok(LedgerConfig::default());
    }

    load_config(&path)
}

const fn default_finalized_weight() -> u64 {
    6
}

const fn default_min_num_chains() -> usize {
    1
}

const fn default_max_num_chains() -> usize {
    999
}

const fn default_max_mask_depth() -> usize {
    32
}

const fn default_max_batch_size() -> u64 {
    1 << 20
}

const fn default_safety_offset() -> u64 {
    1024
}

const fn default_min_finalized_blocks() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fork.finalized_weight, 6);
        assert_eq!(config.tree.max_num_chains, 999);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = LedgerConfig::from_toml_str(
            r"
            [fork]
            finalized_weight = 3

            [tree]
            max_num_chains = 7
            ",
        )
        .unwrap();

        assert_eq!(config.fork.finalized_weight, 3);
        assert_eq!(config.tree.max_num_chains, 7);
        assert_eq!(config.tree.min_num_chains, 1);
        assert_eq!(config.content, ContentConfig::default());
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(LedgerConfig::from_toml_str("").unwrap(), LedgerConfig::default());
    }

    #[test]
    fn zero_weight_is_rejected() {
        let err = LedgerConfig::from_toml_str("[fork]\nfinalized_weight = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("finalized_weight"));
    }

    #[test]
    fn inverted_chain_bounds_are_rejected() {
        let mut config = LedgerConfig::default();
        config.tree.min_num_chains = 5;
        config.tree.max_num_chains = 4;
        assert!(matches!(config.validate(), Err(LedgerError::InvalidConfig(_))));
    }

    #[test]
    fn mask_depth_beyond_id_space_is_rejected() {
        let mut config = LedgerConfig::default();
        config.tree.max_mask_depth = 64;
        assert!(config.validate().is_err());
        config.tree.max_mask_depth = 63;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[priority]\nmin_finalized_blocks = 4").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.priority.min_finalized_blocks, 4);
    }

    #[test]
    fn load_config_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = LedgerConfig::from_toml_str("[fork\nfinalized_weight = ").unwrap_err();
        let ledger = err.downcast_ref::<LedgerError>().expect("ledger error");
        assert_eq!(ledger.code(), ErrorCode::ConfigParseError);

        let err = LedgerConfig::from_toml_str("[fork]\nfinalized_weight = 0\n").unwrap_err();
        let ledger = err.downcast_ref::<LedgerError>().expect("ledger error");
        assert_eq!(ledger.code(), ErrorCode::ConfigInvalid);
    }

    #[test]
    fn user_config_dir_without_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_from_config_dir(dir.path()).unwrap(), LedgerConfig::default());
    }

    #[test]
    fn user_config_dir_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("arbor")).unwrap();
        std::fs::write(
            dir.path().join("arbor/ledger.toml"),
            "[tree]\nmin_num_chains = 2\nmax_num_chains = 8\n",
        )
        .unwrap();

        let config = load_from_config_dir(dir.path()).unwrap();
        assert_eq!(config.tree.min_num_chains, 2);
        assert_eq!(config.tree.max_num_chains, 8);
        assert_eq!(config.fork, ForkConfig::default());
    }

    #[test]
    fn user_config_dir_with_bad_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("arbor")).unwrap();
        std::fs::write(dir.path().join("arbor/ledger.toml"), "[tree\n").unwrap();

        let err = load_from_config_dir(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("ledger.toml"));
        assert!(format!("{err:#}").contains(ErrorCode::ConfigParseError.code()));
    }
}
