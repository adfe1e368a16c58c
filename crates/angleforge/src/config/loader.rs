use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::SecretSources;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::validation(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let upstream = &config.upstream;
    for (field, value) in [
        ("upstream.base_url", &upstream.base_url),
        ("upstream.token_url", &upstream.token_url),
    ] {
        if let Err(e) = reqwest::Url::parse(value) {
            return Err(ConfigError::validation(format!(
                "{} '{}' is not a valid URL: {}",
                field, value, e
            )));
        }
    }
    if upstream.client_id.trim().is_empty() {
        return Err(ConfigError::validation("upstream.client_id must not be empty"));
    }
    if !SecretSources::from_upstream(upstream).is_configured() {
        return Err(ConfigError::validation(
            "upstream needs one of client_secret, client_secret_file or client_secret_env",
        ));
    }

    for (field, secs) in [
        ("upstream.connect_timeout_secs", upstream.connect_timeout_secs),
        ("upstream.status_timeout_secs", upstream.status_timeout_secs),
        ("upstream.submit_timeout_secs", upstream.submit_timeout_secs),
        ("upstream.result_timeout_secs", upstream.result_timeout_secs),
        ("reconciler.sweep_interval_secs", config.reconciler.sweep_interval_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::validation(format!("{} must be > 0", field)));
        }
    }

    if config.reconciler.sweep_concurrency == 0 {
        return Err(ConfigError::validation(
            "reconciler.sweep_concurrency must be > 0",
        ));
    }

    if config.layouts.default_layout.trim().is_empty() {
        return Err(ConfigError::validation("layouts.default_layout must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "upstream": {
            "base_url": "https://gen.example.com/api",
            "token_url": "https://auth.example.com/oauth/token",
            "client_id": "angleforge",
            "client_secret_env": "ANGLEFORGE_CLIENT_SECRET"
        }
    }
    "#;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.upstream.connect_timeout_secs, 10);
        assert_eq!(config.upstream.status_timeout_secs, 15);
        assert_eq!(config.upstream.submit_timeout_secs, 30);
        assert_eq!(config.upstream.result_timeout_secs, 300);
        assert_eq!(config.reconciler.sweep_interval_secs, 30);
        assert_eq!(config.reconciler.stuck_after_secs, 3600);
        assert!(config.reconciler.sweep_concurrency >= 1);
        assert_eq!(config.billing.default_credits, 1);
        assert_eq!(config.billing.included_credits_per_period, None);
        assert_eq!(config.layouts.default_layout, "default");
        assert!(config.layouts.sanitize);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/angleforge/jobs.db" },
            "upstream": {
                "base_url": "https://gen.example.com/api",
                "token_url": "https://auth.example.com/oauth/token",
                "client_id": "angleforge",
                "client_secret": "inline",
                "scope": "generate",
                "result_timeout_secs": 600
            },
            "reconciler": { "sweep_interval_secs": 5, "sweep_concurrency": 2 },
            "billing": {
                "credits_by_job_type": { "marketing_angles": 3 },
                "included_credits_per_period": 100
            },
            "layouts": {
                "templates": { "hero": "<h1 data-slot=\"headline\">Title</h1>" },
                "default_layout": "hero",
                "sanitize": false
            },
            "logging": { "level": "debug", "format": "json" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.upstream.result_timeout_secs, 600);
        assert_eq!(config.reconciler.sweep_concurrency, 2);
        assert_eq!(config.billing.credits_by_job_type["marketing_angles"], 3);
        assert_eq!(config.billing.included_credits_per_period, Some(100));
        assert_eq!(config.layouts.default_layout, "hero");
        assert!(!config.layouts.sanitize);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unsupported_version() {
        let json = MINIMAL.replace("\"1.0\"", "\"2.0\"");
        assert!(matches!(
            load_config_from_str(&json),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_secret_source() {
        let json = MINIMAL.replace(
            r#""client_secret_env": "ANGLEFORGE_CLIENT_SECRET""#,
            r#""scope": "generate""#,
        );
        let err = load_config_from_str(&json).unwrap_err();
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn test_invalid_base_url() {
        let json = MINIMAL.replace("https://gen.example.com/api", "not a url");
        assert!(load_config_from_str(&json).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let json = MINIMAL.replace(
            r#""version": "1.0","#,
            r#""version": "1.0", "reconciler": { "sweep_concurrency": 0 },"#,
        );
        assert!(load_config_from_str(&json).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("angleforge.json");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.upstream.client_id, "angleforge");

        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
