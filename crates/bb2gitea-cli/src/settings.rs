//! Configuration loading and persistence.
//!
//! Settings live in a YAML file under the user's config directory. Each key
//! can be overridden by an environment variable named after the key, with
//! `.` and `-` replaced by `_` and upper-cased (`gitea.skip-verify` becomes
//! `GITEA_SKIP_VERIFY`).

use crate::commands::{CliError, Result};
use bb2gitea_migrate::DEFAULT_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the platform config dir holding the config file.
const CONFIG_DIR_NAME: &str = "bitbucketServer2Gitea";
const CONFIG_FILE_NAME: &str = ".config.yaml";

/// Every key `config set` accepts.
pub const KNOWN_KEYS: [&str; 8] = [
    "bitbucket.server",
    "bitbucket.token",
    "bitbucket.username",
    "gitea.server",
    "gitea.token",
    "gitea.skip-verify",
    "gitea.source-id",
    "timeout",
];

/// Bitbucket Server connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketSettings {
    pub server: String,
    pub token: String,
    /// Username Gitea authenticates with when cloning.
    pub username: String,
}

/// Gitea connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GiteaSettings {
    pub server: String,
    pub token: String,
    pub skip_verify: bool,
    /// Authentication source assigned to provisioned users.
    pub source_id: i64,
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bitbucket: BitbucketSettings,
    pub gitea: GiteaSettings,
    pub timeout: Option<String>,
}

impl Settings {
    /// Load settings from `path` (if it exists) overlaid with the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Load settings using `lookup` to resolve environment overrides.
    pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder().add_source(
            config::File::from(path)
                .format(config::FileFormat::Yaml)
                .required(false),
        );

        for key in KNOWN_KEYS {
            if let Some(value) = lookup(&env_var_name(key)) {
                tracing::debug!(key, "Applying environment override");
                builder = builder.set_override(key, value)?;
            }
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(settings)
    }

    /// Check that both servers are valid URLs and credentials are present.
    pub fn validate(&self) -> Result<()> {
        validate_server("bitbucket.server", &self.bitbucket.server)?;
        validate_server("gitea.server", &self.gitea.server)?;

        let required = [
            ("bitbucket.token", &self.bitbucket.token),
            ("bitbucket.username", &self.bitbucket.username),
            ("gitea.token", &self.gitea.token),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(CliError::MissingValue(key.to_string()));
            }
        }
        Ok(())
    }

    /// Run timeout, falling back to the library default.
    pub fn timeout(&self) -> Result<Duration> {
        match self.timeout.as_deref() {
            Some(value) if !value.trim().is_empty() => parse_duration(value),
            _ => Ok(DEFAULT_TIMEOUT),
        }
    }

    /// Copy of the settings safe to print.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        masked.bitbucket.token = mask(&self.bitbucket.token);
        masked.gitea.token = mask(&self.gitea.token);
        masked
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

fn validate_server(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CliError::MissingValue(key.to_string()));
    }
    url::Url::parse(value).map_err(|e| CliError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Environment variable overriding `key`.
pub fn env_var_name(key: &str) -> String {
    key.replace(['.', '-'], "_").to_uppercase()
}

/// Default config file location.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(CliError::NoConfigDir)
}

/// Persist a single key into the YAML file at `path`.
///
/// Other keys already in the file are preserved.
pub fn set_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        return Err(CliError::UnknownKey(key.to_string()));
    }
    let typed = typed_value(key, value)?;

    let mut document = if path.exists() {
        let contents = fs::read_to_string(path)?;
        match serde_yaml::from_str::<serde_yaml::Value>(&contents)? {
            serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
            other => other,
        }
    } else {
        serde_yaml::Value::Mapping(Default::default())
    };

    insert_path(&mut document, key, typed)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(&document)?)?;
    tracing::info!(key, path = %path.display(), "Saved configuration");
    Ok(())
}

fn typed_value(key: &str, value: &str) -> Result<serde_yaml::Value> {
    let invalid = |message: String| CliError::InvalidValue {
        key: key.to_string(),
        message,
    };

    match key {
        "gitea.skip-verify" => value
            .parse::<bool>()
            .map(serde_yaml::Value::Bool)
            .map_err(|e| invalid(e.to_string())),
        "gitea.source-id" => value
            .parse::<i64>()
            .map(|id| serde_yaml::Value::Number(id.into()))
            .map_err(|e| invalid(e.to_string())),
        "bitbucket.server" | "gitea.server" => {
            url::Url::parse(value).map_err(|e| invalid(e.to_string()))?;
            Ok(serde_yaml::Value::String(value.to_string()))
        }
        "timeout" => {
            parse_duration(value)?;
            Ok(serde_yaml::Value::String(value.to_string()))
        }
        _ => Ok(serde_yaml::Value::String(value.to_string())),
    }
}

fn insert_path(document: &mut serde_yaml::Value, key: &str, value: serde_yaml::Value) -> Result<()> {
    let mut parts: Vec<&str> = key.split('.').collect();
    let leaf = parts.pop().unwrap_or(key);

    let mut node = document;
    for part in parts {
        let mapping = node
            .as_mapping_mut()
            .ok_or_else(|| CliError::InvalidValue {
                key: key.to_string(),
                message: "existing configuration is not a mapping".to_string(),
            })?;
        node = mapping
            .entry(serde_yaml::Value::String(part.to_string()))
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    }

    node.as_mapping_mut()
        .ok_or_else(|| CliError::InvalidValue {
            key: key.to_string(),
            message: "existing configuration is not a mapping".to_string(),
        })?
        .insert(serde_yaml::Value::String(leaf.to_string()), value);
    Ok(())
}

/// Parse a human-readable duration such as `30s`, `10m`, `1h30m` or `2d`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let invalid = |message: &str| CliError::InvalidValue {
        key: "timeout".to_string(),
        message: format!("{message}: '{input}'"),
    };

    if input.is_empty() {
        return Err(invalid("duration cannot be empty"));
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut current = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            current.push(c);
            continue;
        }
        let unit = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return Err(invalid("unknown duration unit")),
        };
        let value: u64 = current
            .parse()
            .map_err(|_| invalid("missing number before unit"))?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| invalid("duration too large"))?;
        current.clear();
    }

    if !current.is_empty() {
        return Err(invalid("trailing number without unit"));
    }
    if total == 0 {
        return Err(invalid("duration must be positive"));
    }
    Ok(Duration::from_secs(total))
}
