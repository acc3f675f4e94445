// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the test invoker.
//!
//! Configuration is read from TOML. The embedded [default config](TrialConfig::DEFAULT_CONFIG)
//! is always loaded first, and a user-supplied file is layered on top of it. Settings are
//! grouped into profiles under `[profile.<name>]`; keys that a custom profile doesn't set are
//! inherited from `[profile.default]`.

use crate::errors::{ConfigParseError, ProfileNotFound};
use camino::Utf8Path;
use config::{Config, File, FileFormat};
use serde::{Deserialize, de::IntoDeserializer};
use std::{collections::BTreeMap, fmt, time::Duration};
use tracing::debug;

/// Settings for a [`TestInvoker`](crate::invoker::TestInvoker).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvokerConfig {
    timeout: Option<Duration>,
    capture_output: bool,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            capture_output: true,
        }
    }
}

impl InvokerConfig {
    /// Returns the maximum amount of time a test body may run for.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true if test output is retained.
    pub fn capture_output(&self) -> bool {
        self.capture_output
    }

    /// Sets the maximum amount of time a test body may run for.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether test output is retained.
    pub fn set_capture_output(&mut self, capture_output: bool) -> &mut Self {
        self.capture_output = capture_output;
        self
    }
}

/// Overall configuration, containing every profile.
#[derive(Clone, Debug)]
pub struct TrialConfig {
    profiles: BTreeMap<String, ProfileDeserialize>,
}

impl TrialConfig {
    /// The conventional location of the user config file, relative to a workspace root.
    pub const CONFIG_PATH: &'static str = ".config/trial-runner.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the default config, and `file` on top of it if specified.
    pub fn from_sources(file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder =
            Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml));
        let config_file = match file {
            Some(file) => {
                builder = builder.add_source(File::new(file.as_str(), FileFormat::Toml));
                file
            }
            None => Utf8Path::new("<default config>"),
        };

        let config = builder
            .build()
            .map_err(|err| ConfigParseError::new(config_file, err))?;
        let config: ConfigDeserialize = config
            .try_deserialize()
            .map_err(|err| ConfigParseError::new(config_file, err))?;
        debug!(
            %config_file,
            profiles = config.profile.len(),
            "loaded trial-runner config"
        );

        Ok(Self {
            profiles: config.profile,
        })
    }

    /// Returns the settings for the given profile.
    pub fn profile(&self, name: &str) -> Result<InvokerConfig, ProfileNotFound> {
        let custom = self
            .profiles
            .get(name)
            .ok_or_else(|| ProfileNotFound::new(name, self.profiles.keys()))?;
        let default = self.profiles.get(Self::DEFAULT_PROFILE);

        let timeout = custom
            .timeout
            .or_else(|| default.and_then(|profile| profile.timeout));
        let capture_output = custom
            .capture_output
            .or_else(|| default.and_then(|profile| profile.capture_output))
            .unwrap_or(true);

        Ok(InvokerConfig {
            timeout,
            capture_output,
        })
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(Self::DEFAULT_PROFILE.to_owned(), ProfileDeserialize::default());
        Self { profiles }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ConfigDeserialize {
    #[serde(default)]
    profile: BTreeMap<String, ProfileDeserialize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProfileDeserialize {
    #[serde(default, deserialize_with = "deserialize_timeout")]
    timeout: Option<Duration>,
    #[serde(default)]
    capture_output: Option<bool>,
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl serde::de::Visitor<'_> for V {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a duration (\"30s\") or an empty string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v.is_empty() {
                Ok(None)
            } else {
                let de: serde::de::value::StrDeserializer<'_, E> = v.into_deserializer();
                let timeout: Duration = humantime_serde::deserialize(de)?;
                Ok(Some(timeout))
            }
        }
    }

    deserializer.deserialize_any(V)
}
