use directories::BaseDirs;
use docent_core::chat::ChatError;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

use crate::siliconflow::catalog;

/// Keys shipped in .env templates that were never replaced count as absent.
const PLACEHOLDER_API_KEY: &str = "your_siliconflow_api_key_here";

pub const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1";

#[derive(Clone, Debug, Deserialize)]
pub struct SiliconFlowFileConfig {
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct SiliconFlowConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
}

impl SiliconFlowConfig {
    /// Resolve configuration from the environment plus an optional config
    /// file. Fails with `Unconfigured` before any network activity when the
    /// API key is absent or still the template placeholder.
    pub fn from_env_and_file() -> Result<Self, ChatError> {
        let api_key = resolve_api_key(env::var("SILICONFLOW_API_KEY").ok().as_deref())?;
        let base_url =
            env::var("SILICONFLOW_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let mut model = env::var("SILICONFLOW_MODEL").ok();
        let mut timeout_ms = 30_000u64;
        let mut stream_idle_timeout_ms = 300_000u64;

        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(raw) = fs::read_to_string(&path) {
                    if let Ok(file_cfg) = toml::from_str::<SiliconFlowFileConfig>(&raw) {
                        if model.is_none() {
                            model = file_cfg.model;
                        }
                        if let Some(t) = file_cfg.timeout_ms {
                            timeout_ms = t;
                        }
                        if let Some(idle) = file_cfg.stream_idle_timeout_ms {
                            stream_idle_timeout_ms = idle;
                        }
                    }
                }
            }
        }

        let proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());

        Ok(SiliconFlowConfig {
            api_key,
            base_url,
            model: catalog::default_model(model.as_deref()).to_string(),
            timeout: Duration::from_millis(timeout_ms),
            stream_idle_timeout: Duration::from_millis(stream_idle_timeout_ms),
            proxy,
        })
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".docent").join("config.toml")
        } else {
            base.config_dir().join("docent").join("config.toml")
        };
        Some(p)
    }
}

fn resolve_api_key(raw: Option<&str>) -> Result<String, ChatError> {
    match raw {
        Some(key) if !key.trim().is_empty() && key != PLACEHOLDER_API_KEY => Ok(key.to_string()),
        _ => Err(ChatError::Unconfigured(
            "SILICONFLOW_API_KEY is not set".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_unconfigured() {
        assert!(matches!(
            resolve_api_key(None),
            Err(ChatError::Unconfigured(_))
        ));
    }

    #[test]
    fn empty_key_is_unconfigured() {
        assert!(matches!(
            resolve_api_key(Some("  ")),
            Err(ChatError::Unconfigured(_))
        ));
    }

    #[test]
    fn placeholder_key_is_unconfigured() {
        assert!(matches!(
            resolve_api_key(Some(PLACEHOLDER_API_KEY)),
            Err(ChatError::Unconfigured(_))
        ));
    }

    #[test]
    fn real_key_passes() {
        assert_eq!(resolve_api_key(Some("sk-abc")).unwrap(), "sk-abc");
    }
}
