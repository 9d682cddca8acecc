#![forbid(unsafe_code)]

//! Runtime configuration: a `.env` file in the working directory provides
//! defaults, real environment variables override the file, and explicit
//! overrides (CLI flags) override both.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_ROOT: &str = "downloads";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
/// Generous by default because downloads are network-bound.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Everything the backend needs to start.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub download_root: PathBuf,
    pub www_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub ytdlp_bin: PathBuf,
    pub timeout_secs: u64,
    pub cookies: Option<PathBuf>,
}

/// Values already decided by the caller (CLI flags, tests); anything left
/// `None` falls through to the environment and the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub download_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings(&file_vars, env_var_string, overrides)
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let download_root = overrides
        .download_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("DOWNLOAD_ROOT", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_ROOT.to_string());
    let www_root = overrides
        .www_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("WWW_ROOT", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_WWW_ROOT.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("MEDIAGRAB_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("MEDIAGRAB_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let ytdlp_bin = lookup_value("MEDIAGRAB_YTDLP", file_vars, &env_lookup)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_YTDLP_BIN.to_string());
    let timeout_secs = lookup_value("MEDIAGRAB_TIMEOUT_SECS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let cookies = lookup_value("MEDIAGRAB_COOKIES", file_vars, &env_lookup)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);

    Ok(RuntimeSettings {
        download_root: PathBuf::from(download_root),
        www_root: PathBuf::from(www_root),
        port,
        host,
        ytdlp_bin: PathBuf::from(ytdlp_bin),
        timeout_secs,
        cookies,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
