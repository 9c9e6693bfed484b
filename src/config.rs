//! TOML configuration.
//!
//! Every section and key is optional; an absent `--config` flag yields
//! [`Config::default`], which reproduces the standard layout
//! (`orig_data/`, `categories/{code}/`, hex addresses, `.json` shards).
//!
//! ```toml
//! [output]
//! global_path = "orig_data"
//! category_path = "categories/{code}"
//! extension = "json"
//!
//! [address]
//! radix = 16
//! min_width = 1
//! max_width = 6
//!
//! [generate]
//! jobs = 4
//! write_retries = 3
//! retry_backoff_ms = 50
//!
//! [corpus]
//! max_retries = 3
//! timeout_secs = 30
//!
//! [rules]
//! url_prefix = "https://cdn.example.org/quotes"
//! random_expr = "uuidv4(cf.random_seed)"
//! host = "quotes.example.org"
//! ```

use anyhow::{Context, Result};
use quote_shards_core::{PlanLimits, Radix};
use serde::Deserialize;
use std::path::{Component, Path};

/// Placeholder substituted with the category code in `output.category_path`.
pub const CODE_PLACEHOLDER: &str = "{code}";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub address: AddressConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_global_path")]
    pub global_path: String,
    #[serde(default = "default_category_path")]
    pub category_path: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            global_path: default_global_path(),
            category_path: default_category_path(),
            extension: default_extension(),
        }
    }
}

fn default_global_path() -> String {
    "orig_data".to_string()
}
fn default_category_path() -> String {
    format!("categories/{}", CODE_PLACEHOLDER)
}
fn default_extension() -> String {
    "json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AddressConfig {
    #[serde(default = "default_radix")]
    pub radix: u32,
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            radix: default_radix(),
            min_width: default_min_width(),
            max_width: default_max_width(),
        }
    }
}

fn default_radix() -> u32 {
    16
}
fn default_min_width() -> u32 {
    1
}
fn default_max_width() -> u32 {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerateConfig {
    /// Worker pool size. `None` means available parallelism.
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Extra attempts after a transient write failure.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            write_retries: default_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_write_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RulesConfig {
    #[serde(default)]
    pub url_prefix: String,
    #[serde(default = "default_random_expr")]
    pub random_expr: String,
    #[serde(default)]
    pub host: Option<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            url_prefix: String::new(),
            random_expr: default_random_expr(),
            host: None,
        }
    }
}

fn default_random_expr() -> String {
    "uuidv4(cf.random_seed)".to_string()
}

impl Config {
    /// Planner bounds derived from `[address]`.
    pub fn plan_limits(&self) -> Result<PlanLimits> {
        Ok(PlanLimits {
            radix: Radix::new(self.address.radix)?,
            min_width: self.address.min_width,
            max_width: self.address.max_width,
        })
    }

    /// Relative directory for the global space.
    pub fn global_path(&self) -> &str {
        &self.output.global_path
    }

    /// Relative directory for a category space.
    pub fn category_path(&self, code: &str) -> String {
        self.output.category_path.replace(CODE_PLACEHOLDER, code)
    }

    /// Worker pool size, falling back to available parallelism.
    pub fn jobs(&self) -> usize {
        self.generate.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate address
    if !(2..=36).contains(&config.address.radix) {
        anyhow::bail!("address.radix must be in 2..=36");
    }
    if config.address.min_width == 0 {
        anyhow::bail!("address.min_width must be >= 1");
    }
    if config.address.min_width > config.address.max_width {
        anyhow::bail!("address.min_width must be <= address.max_width");
    }

    // Validate output
    let out = &config.output;
    if !out.category_path.contains(CODE_PLACEHOLDER) {
        anyhow::bail!(
            "output.category_path must contain '{}' (got '{}')",
            CODE_PLACEHOLDER,
            out.category_path
        );
    }
    check_relative("output.global_path", &out.global_path)?;
    check_relative("output.category_path", &out.category_path)?;
    if out.extension.is_empty() || out.extension.starts_with('.') {
        anyhow::bail!("output.extension must be non-empty and have no leading '.'");
    }

    // Validate generate
    if config.generate.jobs == Some(0) {
        anyhow::bail!("generate.jobs must be >= 1");
    }

    Ok(())
}

/// True when `value` is a non-empty relative path made only of normal
/// components, i.e. it cannot resolve outside the directory it is joined to.
pub fn is_contained(value: &str) -> bool {
    !value.is_empty()
        && Path::new(value)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn check_relative(key: &str, value: &str) -> Result<()> {
    if !is_contained(value) {
        anyhow::bail!(
            "{} must be a relative path without '..' (got '{}')",
            key,
            value
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.global_path(), "orig_data");
        assert_eq!(cfg.category_path("a"), "categories/a");
        assert_eq!(cfg.output.extension, "json");
        assert_eq!(cfg.address.radix, 16);
        assert_eq!(cfg.rules.random_expr, "uuidv4(cf.random_seed)");
        assert!(cfg.jobs() >= 1);
    }

    #[test]
    fn test_custom_paths() {
        let cfg = parse(
            r#"
[output]
global_path = "all"
category_path = "by-type/{code}/q"
extension = "txt"
"#,
        )
        .unwrap();
        assert_eq!(cfg.category_path("k"), "by-type/k/q");
        assert_eq!(cfg.output.extension, "txt");
    }

    #[test]
    fn test_category_path_requires_placeholder() {
        let err = parse("[output]\ncategory_path = \"categories\"\n").unwrap_err();
        assert!(err.to_string().contains("{code}"));
    }

    #[test]
    fn test_paths_must_stay_inside_output() {
        assert!(parse("[output]\nglobal_path = \"../escape\"\n").is_err());
        assert!(parse("[output]\nglobal_path = \"/abs\"\n").is_err());
    }

    #[test]
    fn test_width_bounds() {
        assert!(parse("[address]\nmin_width = 0\n").is_err());
        assert!(parse("[address]\nmin_width = 4\nmax_width = 3\n").is_err());
        assert!(parse("[address]\nradix = 40\n").is_err());
    }

    #[test]
    fn test_extension_without_dot() {
        assert!(parse("[output]\nextension = \".json\"\n").is_err());
    }
}
