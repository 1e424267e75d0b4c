use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSetting {
    Auto,
    Relay,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxSetting {
    Embedded,
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSetting {
    Auto,
    Silent,
    Verbose,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<ProviderSetting>,
    pub relay_url: Option<String>,
    pub relay_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub sandbox: Option<SandboxSetting>,
    pub countdown_secs: Option<u32>,
    pub max_repair_attempts: Option<usize>,
    pub preview_host: Option<String>,
    pub preview_port: Option<u16>,
    pub verbose: Option<bool>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvConfig {
    pub provider: Option<ProviderSetting>,
    pub relay_url: Option<String>,
    pub relay_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub sandbox: Option<SandboxSetting>,
    pub countdown_secs: Option<u32>,
    pub max_repair_attempts: Option<usize>,
    pub preview_host: Option<String>,
    pub preview_port: Option<u16>,
    pub verbose: Option<bool>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    pub provider: Option<ProviderSetting>,
    pub relay_url: Option<String>,
    pub model: Option<String>,
    pub countdown_secs: Option<u32>,
    pub max_repair_attempts: Option<usize>,
    pub verbose: Option<bool>,
    pub no_progress: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDefaults {
    pub provider: ProviderSetting,
    pub relay_url: String,
    pub relay_model: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_api_key: Option<String>,
    pub sandbox: SandboxSetting,
    pub countdown_secs: u32,
    pub max_repair_attempts: usize,
    pub preview_host: String,
    pub preview_port: u16,
    pub verbose: bool,
    pub progress: ProgressSetting,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            provider: ProviderSetting::Auto,
            relay_url: "http://127.0.0.1:3000".to_string(),
            relay_model: "default".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4.1-mini".to_string(),
            openai_api_key: None,
            sandbox: SandboxSetting::Embedded,
            countdown_secs: 5,
            max_repair_attempts: 0,
            preview_host: "127.0.0.1".to_string(),
            preview_port: 4174,
            verbose: false,
            progress: ProgressSetting::Auto,
        }
    }
}

pub fn load_file_config(explicit_path: Option<&Path>, cwd: &Path) -> Result<Option<FileConfig>> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => {
            let candidate = cwd.join("kiln.json");
            if !candidate.exists() {
                return Ok(None);
            }
            candidate
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;
    let parsed: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing config file {}", path.display()))?;
    Ok(Some(parsed))
}

impl EnvConfig {
    pub fn from_current_env() -> Self {
        Self {
            provider: env::var("KILN_PROVIDER")
                .ok()
                .and_then(|v| parse_provider(&v)),
            relay_url: env::var("KILN_RELAY_URL").ok(),
            relay_model: env::var("KILN_RELAY_MODEL").ok(),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            openai_model: env::var("KILN_MODEL").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            sandbox: env::var("KILN_SANDBOX").ok().and_then(|v| parse_sandbox(&v)),
            countdown_secs: env::var("KILN_COUNTDOWN")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            max_repair_attempts: env::var("KILN_MAX_REPAIR_ATTEMPTS")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            preview_host: env::var("KILN_PREVIEW_HOST").ok(),
            preview_port: env::var("KILN_PREVIEW_PORT")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            verbose: env::var("KILN_VERBOSE").ok().and_then(|v| parse_bool(&v)),
            progress: env::var("KILN_PROGRESS")
                .ok()
                .and_then(|v| parse_progress(&v)),
        }
    }
}

pub fn resolve_run_defaults(
    cli: &CliOverrides,
    env_cfg: &EnvConfig,
    file_cfg: Option<&FileConfig>,
) -> RunDefaults {
    let base = RunDefaults::default();

    let provider = cli
        .provider
        .or(env_cfg.provider)
        .or(file_cfg.and_then(|c| c.provider))
        .unwrap_or(base.provider);

    let relay_url = cli
        .relay_url
        .clone()
        .or_else(|| env_cfg.relay_url.clone())
        .or_else(|| file_cfg.and_then(|c| c.relay_url.clone()))
        .unwrap_or(base.relay_url);

    let relay_model = cli
        .model
        .clone()
        .or_else(|| env_cfg.relay_model.clone())
        .or_else(|| file_cfg.and_then(|c| c.relay_model.clone()))
        .unwrap_or(base.relay_model);

    let openai_base_url = env_cfg
        .openai_base_url
        .clone()
        .or_else(|| file_cfg.and_then(|c| c.openai_base_url.clone()))
        .unwrap_or(base.openai_base_url);

    let openai_model = cli
        .model
        .clone()
        .or_else(|| env_cfg.openai_model.clone())
        .or_else(|| file_cfg.and_then(|c| c.openai_model.clone()))
        .unwrap_or(base.openai_model);

    let openai_api_key = env_cfg
        .openai_api_key
        .clone()
        .or_else(|| file_cfg.and_then(|c| c.openai_api_key.clone()))
        .or(base.openai_api_key);

    let sandbox = env_cfg
        .sandbox
        .or(file_cfg.and_then(|c| c.sandbox))
        .unwrap_or(base.sandbox);

    let countdown_secs = cli
        .countdown_secs
        .or(env_cfg.countdown_secs)
        .or(file_cfg.and_then(|c| c.countdown_secs))
        .unwrap_or(base.countdown_secs);

    let max_repair_attempts = cli
        .max_repair_attempts
        .or(env_cfg.max_repair_attempts)
        .or(file_cfg.and_then(|c| c.max_repair_attempts))
        .unwrap_or(base.max_repair_attempts);

    let preview_host = env_cfg
        .preview_host
        .clone()
        .or_else(|| file_cfg.and_then(|c| c.preview_host.clone()))
        .unwrap_or(base.preview_host);

    let preview_port = env_cfg
        .preview_port
        .or(file_cfg.and_then(|c| c.preview_port))
        .unwrap_or(base.preview_port);

    let verbose = cli
        .verbose
        .or(env_cfg.verbose)
        .or(file_cfg.and_then(|c| c.verbose))
        .unwrap_or(base.verbose);

    let mut progress = env_cfg
        .progress
        .or(file_cfg.and_then(|c| c.progress))
        .unwrap_or(base.progress);

    if cli.no_progress == Some(true) {
        progress = ProgressSetting::Silent;
    }

    RunDefaults {
        provider,
        relay_url,
        relay_model,
        openai_base_url,
        openai_model,
        openai_api_key,
        sandbox,
        countdown_secs,
        max_repair_attempts,
        preview_host,
        preview_port,
        verbose,
        progress,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_provider(input: &str) -> Option<ProviderSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProviderSetting::Auto),
        "relay" => Some(ProviderSetting::Relay),
        "openai" | "openai-compatible" => Some(ProviderSetting::Openai),
        _ => None,
    }
}

fn parse_sandbox(input: &str) -> Option<SandboxSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "embedded" => Some(SandboxSetting::Embedded),
        "browser" => Some(SandboxSetting::Browser),
        _ => None,
    }
}

fn parse_progress(input: &str) -> Option<ProgressSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProgressSetting::Auto),
        "silent" => Some(ProgressSetting::Silent),
        "verbose" => Some(ProgressSetting::Verbose),
        _ => None,
    }
}
