use crate::preview_server::BrowserSandbox;
use anyhow::{Result, anyhow};
use kiln_config::{
    CliOverrides, EnvConfig, ProgressSetting, ProviderSetting, RunDefaults, SandboxSetting,
    load_file_config, resolve_run_defaults,
};
use kiln_llm::{
    GenerationBackend, GenerationRequest, ProviderRouter, ProviderSelection, ReachabilityProbe,
};
use kiln_llm_openai::OpenAiCompatibleClient;
use kiln_llm_relay::RelayClient;
use kiln_sandbox::{EmbeddedSandbox, Sandbox};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressMode {
    Silent,
    Minimal,
    Verbose,
}

pub(crate) struct RelayProbe {
    client: RelayClient,
}

impl ReachabilityProbe for RelayProbe {
    fn relay_reachable(&self) -> bool {
        self.client.is_reachable()
    }
}

pub(crate) struct MaybeOpenAiClient {
    inner: Option<OpenAiCompatibleClient>,
}

impl GenerationBackend for MaybeOpenAiClient {
    fn generate(&self, req: &GenerationRequest, model: &str) -> Result<String> {
        let client = self.inner.as_ref().ok_or_else(|| {
            anyhow!("OPENAI_API_KEY is required for OpenAI-compatible generation")
        })?;
        client.generate(req, model)
    }
}

pub(crate) type KilnService = ProviderRouter<RelayClient, MaybeOpenAiClient, RelayProbe>;

pub(crate) fn provider_to_selection(provider: ProviderSetting) -> ProviderSelection {
    match provider {
        ProviderSetting::Auto => ProviderSelection::Auto,
        ProviderSetting::Relay => ProviderSelection::Relay,
        ProviderSetting::Openai => ProviderSelection::OpenAiCompatible,
    }
}

pub(crate) fn resolved_progress_mode(progress: ProgressSetting, verbose: bool) -> ProgressMode {
    match progress {
        ProgressSetting::Silent => ProgressMode::Silent,
        ProgressSetting::Verbose => ProgressMode::Verbose,
        ProgressSetting::Auto => {
            if verbose {
                ProgressMode::Verbose
            } else {
                ProgressMode::Minimal
            }
        }
    }
}

pub(crate) fn resolve_config(
    config: Option<PathBuf>,
    cli_overrides: &CliOverrides,
) -> Result<RunDefaults> {
    let cwd = std::env::current_dir()?;
    let file_cfg = load_file_config(config.as_deref(), &cwd)?;
    let env_cfg = EnvConfig::from_current_env();
    Ok(resolve_run_defaults(cli_overrides, &env_cfg, file_cfg.as_ref()))
}

pub(crate) fn build_service(resolved: &RunDefaults) -> Result<KilnService> {
    let relay_client = RelayClient::new(resolved.relay_url.clone())?;
    let openai_client = MaybeOpenAiClient {
        inner: resolved.openai_api_key.clone().map(|api_key| {
            OpenAiCompatibleClient::from_parts(resolved.openai_base_url.clone(), api_key)
        }),
    };

    Ok(ProviderRouter {
        relay: relay_client.clone(),
        openai: openai_client,
        reachability: RelayProbe {
            client: relay_client,
        },
        relay_model: resolved.relay_model.clone(),
        openai_model: resolved.openai_model.clone(),
    })
}

pub(crate) fn build_sandbox(resolved: &RunDefaults) -> Result<Box<dyn Sandbox>> {
    match resolved.sandbox {
        SandboxSetting::Embedded => Ok(Box::new(EmbeddedSandbox::new())),
        SandboxSetting::Browser => Ok(Box::new(BrowserSandbox::start(
            &resolved.preview_host,
            resolved.preview_port,
        )?)),
    }
}
