//! Load options, read from YAML and overridden by command-line flags.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    identifiers::{DEFAULT_MAX_IDENTIFIER_LENGTH, MIN_IDENTIFIER_LENGTH},
    inference::{DEFAULT_NULL_MARKERS, NullMarkers, SampleSize},
    loader::{DEFAULT_BATCH_SIZE, FailurePolicy, LoaderSettings},
    reconcile::TablePolicy,
};

/// Longest accepted `timeout_per_batch`; database drivers take the busy
/// timeout as a signed 32-bit millisecond count.
pub const MAX_TIMEOUT_PER_BATCH: Duration = Duration::from_millis(i32::MAX as u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub auto_create_table: bool,
    pub on_batch_failure: FailurePolicy,
    pub max_identifier_length: usize,
    pub sample_size_for_inference: SampleSize,
    #[serde(with = "duration_text", skip_serializing_if = "Option::is_none")]
    pub timeout_per_batch: Option<Duration>,
    pub null_markers: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            auto_create_table: true,
            on_batch_failure: FailurePolicy::default(),
            max_identifier_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
            sample_size_for_inference: SampleSize::default(),
            timeout_per_batch: None,
            null_markers: DEFAULT_NULL_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl LoadOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Opening config file {path:?}"))?;
        let options = Self::from_yaml(&contents)
            .with_context(|| format!("Parsing config file {path:?}"))?;
        Ok(options)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let options: LoadOptions = serde_yaml::from_str(contents)?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing load options")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size >= 1, "batch_size must be at least 1");
        ensure!(
            self.max_identifier_length >= MIN_IDENTIFIER_LENGTH,
            "max_identifier_length must be at least {MIN_IDENTIFIER_LENGTH}, got {}",
            self.max_identifier_length
        );
        if let Some(timeout) = self.timeout_per_batch {
            ensure!(!timeout.is_zero(), "timeout_per_batch must be greater than zero");
            ensure!(
                timeout <= MAX_TIMEOUT_PER_BATCH,
                "timeout_per_batch must be at most {}, got {}",
                format_duration(&MAX_TIMEOUT_PER_BATCH),
                format_duration(&timeout)
            );
        }
        Ok(())
    }

    pub fn table_policy(&self) -> TablePolicy {
        TablePolicy::from(self.auto_create_table)
    }

    pub fn null_markers(&self) -> NullMarkers {
        NullMarkers::new(&self.null_markers)
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            batch_size: self.batch_size,
            on_failure: self.on_batch_failure,
            timeout: self.timeout_per_batch,
            null_markers: self.null_markers(),
        }
    }
}

/// Parses `500ms`, `30s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow!("Invalid duration '{value}'"))?;
    let seconds = |factor: u64| {
        amount
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow!("Duration '{value}' is too large"))
    };
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => seconds(60),
        "h" => seconds(3_600),
        other => Err(anyhow!("Unknown duration unit '{other}' in '{value}'")),
    }
}

pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

mod duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{format_duration, parse_duration};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&format_duration(duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Seconds(seconds)) => Ok(Some(Duration::from_secs(seconds))),
            Some(Repr::Text(text)) => parse_duration(&text).map(Some).map_err(D::Error::custom),
        }
    }
}
