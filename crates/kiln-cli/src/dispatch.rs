use super::{Cli, Commands, ProviderArg, chat, render_command, runtime_context};
use anyhow::Result;
use kiln_config::CliOverrides;

pub(crate) fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Chat {
            config,
            provider,
            relay_url,
            model,
            countdown,
            max_repair_attempts,
            no_progress,
            verbose,
        }) => {
            let overrides = CliOverrides {
                provider: provider.map(ProviderArg::as_setting),
                relay_url,
                model,
                countdown_secs: countdown,
                max_repair_attempts,
                verbose: verbose.then_some(true),
                no_progress: no_progress.then_some(true),
            };
            let resolved = runtime_context::resolve_config(config, &overrides)?;
            chat::chat_command(&resolved, overrides.model.clone())
        }
        Some(Commands::Render { file, output }) => render_command(file, output),
        None => {
            let resolved = runtime_context::resolve_config(None, &CliOverrides::default())?;
            chat::chat_command(&resolved, None)
        }
    }
}
