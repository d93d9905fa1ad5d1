use crate::coordinator::default_concurrency;
use crate::error::ConfigError;
use crate::executor::{CommandOracleConfig, InputDelivery};
use crate::mutator::{CharMap, MutationEngine, MutationRule};
use crate::sink::DEFAULT_ATTEMPT_BUFFER;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OracleSettings {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            input_delivery: ConfigInputDelivery::default(),
            timeout_ms: default_timeout_ms(),
            working_dir: None,
        }
    }
}

impl OracleSettings {
    pub fn command_config(&self) -> Result<CommandOracleConfig, ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::MissingOracleCommand);
        }
        let input_delivery = match &self.input_delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
        };
        Ok(CommandOracleConfig {
            command: self.command.clone(),
            input_delivery,
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
        })
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct InputSettings {
    #[serde(default = "default_seed_file")]
    pub seed_file: PathBuf,
    #[serde(default = "default_pass_file")]
    pub pass_file: PathBuf,
    #[serde(default = "default_address_file")]
    pub address_file: PathBuf,
}

pub fn default_seed_file() -> PathBuf {
    PathBuf::from("seed_phrases.txt")
}
pub fn default_pass_file() -> PathBuf {
    PathBuf::from("passphrases.txt")
}
pub fn default_address_file() -> PathBuf {
    PathBuf::from("addresses_to_find.txt")
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            seed_file: default_seed_file(),
            pass_file: default_pass_file(),
            address_file: default_address_file(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SearchSettings {
    #[serde(default)]
    pub typos: usize,
    #[serde(default)]
    pub typos_capslock: bool,
    #[serde(default)]
    pub typos_swap: bool,
    #[serde(default)]
    pub typos_repeat: bool,
    #[serde(default)]
    pub typos_delete: bool,
    #[serde(default)]
    pub typos_case: bool,
    pub typos_map: Option<PathBuf>,
    #[serde(default = "default_concurrency")]
    pub workers: usize,
    #[serde(default)]
    pub log_attempts: bool,
    #[serde(default = "default_attempt_log")]
    pub attempt_log: PathBuf,
    #[serde(default = "default_attempt_buffer")]
    pub attempt_buffer: usize,
    #[serde(default)]
    pub skip_no_passphrase: bool,
}

pub fn default_attempt_log() -> PathBuf {
    PathBuf::from("attempts_log.txt")
}
fn default_attempt_buffer() -> usize {
    DEFAULT_ATTEMPT_BUFFER
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            typos: 0,
            typos_capslock: false,
            typos_swap: false,
            typos_repeat: false,
            typos_delete: false,
            typos_case: false,
            typos_map: None,
            workers: default_concurrency(),
            log_attempts: false,
            attempt_log: default_attempt_log(),
            attempt_buffer: default_attempt_buffer(),
            skip_no_passphrase: false,
        }
    }
}

impl SearchSettings {
    /// The rule kinds switched on by the individual toggles. The map rule is
    /// enabled by the presence of `typos_map` instead.
    pub fn enabled_rules(&self) -> Vec<MutationRule> {
        [
            (self.typos_capslock, MutationRule::CapsLock),
            (self.typos_delete, MutationRule::Delete),
            (self.typos_repeat, MutationRule::Repeat),
            (self.typos_swap, MutationRule::Swap),
            (self.typos_case, MutationRule::Case),
        ]
        .into_iter()
        .filter_map(|(enabled, rule)| enabled.then_some(rule))
        .collect()
    }

    /// Builds the mutation engine, loading the typos map if one is configured.
    pub fn mutation_engine(&self) -> Result<MutationEngine, ConfigError> {
        let engine = MutationEngine::new(self.typos).with_rules(self.enabled_rules());
        match &self.typos_map {
            Some(path) => Ok(engine.with_char_map(CharMap::load(path)?)),
            None => Ok(engine),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TyposcanConfig {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub inputs: InputSettings,
    #[serde(default)]
    pub oracle: OracleSettings,
}

impl TyposcanConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Ok(Self::from_toml_str(&content, path)?)
    }

    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Checks the settings that can be checked without touching the inputs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.workers == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.oracle.command.is_empty() {
            return Err(ConfigError::MissingOracleCommand);
        }
        Ok(())
    }
}
