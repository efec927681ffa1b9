//! Session configuration, loadable from TOML.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SampleKind;

/// How replicate aggregates are produced for bootstrap confidence intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMethod {
    /// Point estimate only.
    #[default]
    Identical,
    /// Replicate-weight columns materialized with the sample.
    Stored,
    /// Engine-side bootstrap aggregate functions.
    Uda,
    /// Row-level weight function evaluated at query time.
    OnTheFly,
}

impl BootstrapMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapMethod::Identical => "identical",
            BootstrapMethod::Stored => "stored",
            BootstrapMethod::Uda => "uda",
            BootstrapMethod::OnTheFly => "on_the_fly",
        }
    }

    pub fn replicates(&self) -> bool {
        !matches!(self, BootstrapMethod::Identical)
    }
}

impl FromStr for BootstrapMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "identical" | "none" => Ok(BootstrapMethod::Identical),
            "stored" => Ok(BootstrapMethod::Stored),
            "uda" => Ok(BootstrapMethod::Uda),
            "on_the_fly" | "onthefly" => Ok(BootstrapMethod::OnTheFly),
            other => Err(Error::invalid_config(format!(
                "unknown bootstrap method '{}'",
                other
            ))),
        }
    }
}

/// Which sample kinds the selector may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleTypePreference {
    #[default]
    Any,
    Uniform,
    Stratified,
    Universe,
}

impl SampleTypePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleTypePreference::Any => "any",
            SampleTypePreference::Uniform => "uniform",
            SampleTypePreference::Stratified => "stratified",
            SampleTypePreference::Universe => "universe",
        }
    }

    pub fn allows(&self, kind: SampleKind) -> bool {
        match self {
            SampleTypePreference::Any => true,
            SampleTypePreference::Uniform => kind == SampleKind::Uniform,
            SampleTypePreference::Stratified => kind == SampleKind::Stratified,
            SampleTypePreference::Universe => kind == SampleKind::Universe,
        }
    }
}

impl FromStr for SampleTypePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(SampleTypePreference::Any),
            other => Ok(match SampleKind::from_str(other)? {
                SampleKind::Uniform => SampleTypePreference::Uniform,
                SampleKind::Stratified => SampleTypePreference::Stratified,
                SampleKind::Universe => SampleTypePreference::Universe,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub method: BootstrapMethod,
    pub trials: usize,
    pub confidence: f64,
    /// Prefix of the engine's bootstrap aggregates, e.g. `bootstrap_sum`.
    pub uda_prefix: String,
    /// Row-level Poisson(1) weight function taking the trial number.
    pub weight_function: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            method: BootstrapMethod::Identical,
            trials: 50,
            confidence: 0.95,
            uda_prefix: "bootstrap_".to_string(),
            weight_function: "poisson_weight".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AqpConfig {
    /// Execute every statement exactly, without rewriting.
    pub bypass: bool,
    pub preferred_sample_ratio: f64,
    /// Ratio used when `CREATE SAMPLE` does not name one.
    pub default_sample_ratio: f64,
    pub sample_type: SampleTypePreference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_schema: Option<String>,
    pub meta_schema: String,
    pub meta_size_table: String,
    pub meta_name_table: String,
    pub partition_count: u32,
    pub bootstrap: BootstrapConfig,
}

impl Default for AqpConfig {
    fn default() -> Self {
        Self {
            bypass: false,
            preferred_sample_ratio: 0.01,
            default_sample_ratio: 0.01,
            sample_type: SampleTypePreference::Any,
            sample_schema: None,
            meta_schema: "aqp".to_string(),
            meta_size_table: "aqp_meta_size".to_string(),
            meta_name_table: "aqp_meta_name".to_string(),
            partition_count: 100,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl AqpConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AqpConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::invalid_config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("preferred_sample_ratio", self.preferred_sample_ratio),
            ("default_sample_ratio", self.default_sample_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(Error::invalid_config(format!(
                    "{} must be in (0, 1], got {}",
                    name, ratio
                )));
            }
        }
        let confidence = self.bootstrap.confidence;
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(Error::invalid_config(format!(
                "bootstrap.confidence must be in (0, 1), got {}",
                confidence
            )));
        }
        if self.bootstrap.method.replicates() && self.bootstrap.trials == 0 {
            return Err(Error::invalid_config(
                "bootstrap.trials must be positive when replicating".to_string(),
            ));
        }
        if self.partition_count == 0 {
            return Err(Error::invalid_config(
                "partition_count must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies a `SET key = value` assignment, rejecting values that fail validation.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
        let mut next = self.clone();
        match key.trim().to_lowercase().replace('-', "_").as_str() {
            "bypass" => next.bypass = parse_bool(key, value)?,
            "preferred_sample_ratio" => next.preferred_sample_ratio = parse_number(key, value)?,
            "default_sample_ratio" => next.default_sample_ratio = parse_number(key, value)?,
            "sample_type" => next.sample_type = value.parse()?,
            "sample_schema" => {
                next.sample_schema = if value.is_empty() {
                    None
                } else {
                    Some(value.to_lowercase())
                }
            }
            "meta_schema" => next.meta_schema = value.to_lowercase(),
            "meta_size_table" => next.meta_size_table = value.to_lowercase(),
            "meta_name_table" => next.meta_name_table = value.to_lowercase(),
            "partition_count" => next.partition_count = parse_number(key, value)?,
            "bootstrap" | "bootstrap.method" | "bootstrap_method" => {
                next.bootstrap.method = value.parse()?
            }
            "bootstrap.trials" | "bootstrap_trials" => {
                next.bootstrap.trials = parse_number(key, value)?
            }
            "bootstrap.confidence" | "bootstrap_confidence" => {
                next.bootstrap.confidence = parse_number(key, value)?
            }
            "bootstrap.uda_prefix" => next.bootstrap.uda_prefix = value.to_string(),
            "bootstrap.weight_function" => next.bootstrap.weight_function = value.to_string(),
            other => {
                return Err(Error::invalid_config(format!(
                    "unknown configuration key '{}'",
                    other
                )));
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Every setting as `(key, value)`, keyed as `set` accepts them.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("bypass", self.bypass.to_string()),
            ("preferred_sample_ratio", self.preferred_sample_ratio.to_string()),
            ("default_sample_ratio", self.default_sample_ratio.to_string()),
            ("sample_type", self.sample_type.as_str().to_string()),
            ("sample_schema", self.sample_schema.clone().unwrap_or_default()),
            ("meta_schema", self.meta_schema.clone()),
            ("meta_size_table", self.meta_size_table.clone()),
            ("meta_name_table", self.meta_name_table.clone()),
            ("partition_count", self.partition_count.to_string()),
            ("bootstrap.method", self.bootstrap.method.as_str().to_string()),
            ("bootstrap.trials", self.bootstrap.trials.to_string()),
            ("bootstrap.confidence", self.bootstrap.confidence.to_string()),
            ("bootstrap.uda_prefix", self.bootstrap.uda_prefix.clone()),
            ("bootstrap.weight_function", self.bootstrap.weight_function.clone()),
        ]
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(true),
        "false" | "off" | "0" | "no" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "{} expects a boolean, got '{}'",
            key, value
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::invalid_config(format!("{} expects a number, got '{}'", key, value))
    })
}
