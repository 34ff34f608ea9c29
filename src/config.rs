use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::convert::ConvertOptions;
use crate::source::{LengthPolicy, SourceFormat};

const DEFAULT_OUTPUT_DIR: &str = "detector_labels";

pub const ENV_CONFIG: &str = "RESULTS_TXT_CONFIG";
pub const ENV_SOURCE: &str = "RESULTS_TXT_SOURCE";
pub const ENV_OUTPUT_DIR: &str = "RESULTS_TXT_OUTPUT_DIR";
pub const ENV_FORMAT: &str = "RESULTS_TXT_FORMAT";
pub const ENV_LENGTH_MISMATCH: &str = "RESULTS_TXT_LENGTH_MISMATCH";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ExportConfigFile {
    source: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    format: Option<String>,
    length_mismatch: Option<String>,
}

/// Values given on the command line; they win over env and file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub format: Option<SourceFormat>,
    pub length_policy: Option<LengthPolicy>,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    /// Unset means "infer from the source extension".
    pub format: Option<SourceFormat>,
    pub length_policy: LengthPolicy,
}

impl ExportConfig {
    /// Resolve from defaults, config file, environment, then `overrides`.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| non_blank_env(ENV_CONFIG).map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => ExportConfigFile::default(),
        };
        let mut cfg = Partial::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            format: self.format,
            length_policy: self.length_policy,
        }
    }
}

struct Partial {
    source: Option<PathBuf>,
    output_dir: PathBuf,
    format: Option<SourceFormat>,
    length_policy: LengthPolicy,
}

impl Partial {
    fn from_file(file: ExportConfigFile) -> Result<Self> {
        let format: Option<SourceFormat> = file
            .format
            .as_deref()
            .map(|f| f.parse().map_err(|e: String| anyhow!("config format: {}", e)))
            .transpose()?;
        let length_policy: LengthPolicy = file
            .length_mismatch
            .as_deref()
            .map(|p| {
                p.parse()
                    .map_err(|e: String| anyhow!("config length_mismatch: {}", e))
            })
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            source: file.source,
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            format,
            length_policy,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_blank_env(ENV_SOURCE) {
            self.source = Some(PathBuf::from(source));
        }
        if let Some(dir) = non_blank_env(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(format) = non_blank_env(ENV_FORMAT) {
            self.format = Some(
                format
                    .parse()
                    .map_err(|e: String| anyhow!("{}: {}", ENV_FORMAT, e))?,
            );
        }
        if let Some(policy) = non_blank_env(ENV_LENGTH_MISMATCH) {
            self.length_policy = policy
                .parse()
                .map_err(|e: String| anyhow!("{}: {}", ENV_LENGTH_MISMATCH, e))?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if overrides.source.is_some() {
            self.source = overrides.source;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if overrides.format.is_some() {
            self.format = overrides.format;
        }
        if let Some(policy) = overrides.length_policy {
            self.length_policy = policy;
        }
    }

    fn validate(self) -> Result<ExportConfig> {
        let source = self.source.ok_or_else(|| {
            anyhow!(
                "results file not set (pass SOURCE, set {} or `source` in the config file)",
                ENV_SOURCE
            )
        })?;
        if source.as_os_str().is_empty() {
            return Err(anyhow!("results file path is empty"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("output directory path is empty"));
        }
        Ok(ExportConfig {
            source,
            output_dir: self.output_dir,
            format: self.format,
            length_policy: self.length_policy,
        })
    }
}

fn read_config_file(path: &Path) -> Result<ExportConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: ExportConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
