//! Resolution of the upstream client secret.
//!
//! A secret may be configured in three ways, tried in this order:
//!
//! 1. **Inline** - `client_secret` in the config file, for local testing
//! 2. **File** - `client_secret_file`, e.g. a mounted `/run/secrets/...`
//! 3. **Environment** - `client_secret_env`, the name of a variable to read

use secrecy::SecretString;
use std::fs;

use crate::config::UpstreamConfig;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No client secret configured (need client_secret, client_secret_file or client_secret_env)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// The configured places a secret may come from. Empty strings count as
/// unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretSources<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env: Option<&'a str>,
}

impl<'a> SecretSources<'a> {
    pub fn from_upstream(config: &'a UpstreamConfig) -> Self {
        Self {
            inline: config.client_secret.as_deref(),
            file: config.client_secret_file.as_deref(),
            env: config.client_secret_env.as_deref(),
        }
    }

    pub fn is_configured(&self) -> bool {
        [self.inline, self.file, self.env]
            .iter()
            .any(|source| source.is_some_and(|s| !s.is_empty()))
    }

    /// Reads the secret from the first configured source. A configured
    /// source that fails is an error; later sources are not consulted.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = self.inline.filter(|v| !v.is_empty()) {
            return non_empty(value.to_string(), "inline config");
        }

        if let Some(path) = self.file.filter(|p| !p.is_empty()) {
            let expanded = expand_home(path);
            let content =
                fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                    path: expanded.clone(),
                    source: e,
                })?;
            return non_empty(content.trim().to_string(), &format!("file '{}'", expanded));
        }

        if let Some(name) = self.env.filter(|n| !n.is_empty()) {
            return match std::env::var(name) {
                // Env vars may carry a trailing newline
                Ok(value) => non_empty(value.trim().to_string(), &format!("${}", name)),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }
}

fn non_empty(value: String, origin: &str) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty {
            origin: origin.to_string(),
        });
    }
    Ok(SecretString::from(value))
}

/// Resolves the client secret configured for the upstream service.
pub fn resolve_secret(config: &UpstreamConfig) -> Result<SecretString> {
    SecretSources::from_upstream(config).resolve()
}

/// Expands a leading `~` to the user's home directory. `~user/...` is not
/// supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
