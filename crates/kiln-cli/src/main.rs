mod chat;
mod dispatch;
mod preview_server;
mod runtime_context;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use kiln_config::ProviderSetting;
use kiln_protocol::{Reply, parse_reply};
use kiln_sandbox::SandboxProject;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Auto,
    Relay,
    Openai,
}

impl ProviderArg {
    fn as_setting(self) -> ProviderSetting {
        match self {
            ProviderArg::Auto => ProviderSetting::Auto,
            ProviderArg::Relay => ProviderSetting::Relay,
            ProviderArg::Openai => ProviderSetting::Openai,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kiln", version, about = "Kiln conversational app builder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start an interactive build session.
    Chat {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,
        #[arg(long)]
        relay_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        countdown: Option<u32>,
        #[arg(long)]
        max_repair_attempts: Option<usize>,
        #[arg(long)]
        no_progress: bool,
        #[arg(long)]
        verbose: bool,
    },
    /// Classify a saved model reply; optionally compose its preview project.
    Render {
        file: PathBuf,
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

fn render_command(file: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let raw = fs::read_to_string(&file)
        .with_context(|| format!("failed reading reply file {}", file.display()))?;

    let reply = parse_reply(&raw).map_err(|err| anyhow!(err))?;
    match reply {
        Reply::Message(message) => {
            println!("message: {}", message.text);
        }
        Reply::Artifact(artifact) => {
            let label = if artifact.version_label.is_empty() {
                "unlabeled"
            } else {
                artifact.version_label.as_str()
            };
            println!("artifact: {label}");
            if !artifact.description.is_empty() {
                println!("{}", artifact.description);
            }

            match output {
                Some(dir) => {
                    let project =
                        SandboxProject::compose(&artifact.source_code, &artifact.dependencies)?;
                    project.write_to(&dir)?;
                    println!("{}", dir.display());
                }
                None => {
                    println!("{}", artifact.source_code);
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dispatch::execute(cli)
}
