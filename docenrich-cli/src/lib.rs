//! Config file handling for the `docenrich` binary.
//!
//! The config is a TOML file whose `[converter]` table holds the converter
//! options by their option names. Multi-valued options are arrays:
//!
//! ```toml
//! [converter]
//! support-root = "/opt/docenrich"
//! pear-filename = "people.pear"
//! enable-annotation-offsets = true
//! type = ["Person.org.example.PersonType", "Confidence.org.example.PersonType.confidence"]
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use toml::Value;

use docenrich_converter::FlatOptions;

#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub converter: toml::Table,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Flattens the `[converter]` table. `true` sets a flag, `false` leaves
    /// it unset, arrays repeat the key.
    pub fn options(&self) -> Result<FlatOptions> {
        let mut options = FlatOptions::new();
        for (key, value) in &self.converter {
            match value {
                Value::Array(items) => {
                    for item in items {
                        push_scalar(&mut options, key, item)?;
                    }
                }
                other => push_scalar(&mut options, key, other)?,
            }
        }
        Ok(options)
    }
}

fn push_scalar(options: &mut FlatOptions, key: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => options.push(key, s.as_str()),
        Value::Integer(i) => options.push(key, i.to_string()),
        Value::Float(f) => options.push(key, f.to_string()),
        Value::Boolean(true) => options.push(key, key),
        Value::Boolean(false) => {}
        other => bail!("option '{key}' has unsupported value {other}"),
    }
    Ok(())
}

/// Options from the config file at `path`; none when no config is given.
pub fn base_options(path: Option<&Path>) -> Result<FlatOptions> {
    match path {
        Some(path) => CliConfig::load(path)?.options(),
        None => Ok(FlatOptions::new()),
    }
}

/// Parses a `KEY=VALUE` command-line override.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("expected KEY=VALUE, got {raw:?}"),
    }
}
