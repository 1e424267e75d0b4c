use crate::runtime_context::{
    self, KilnService, ProgressMode, build_sandbox, build_service, resolved_progress_mode,
};
use anyhow::{Context, Result};
use kiln_config::RunDefaults;
use kiln_llm::ProviderSelection;
use kiln_sandbox::{Sandbox, SandboxProject};
use kiln_session::{
    ExchangeOutcome, Payload, RepairEvent, RepairLoop, Session, catalog, drive_repair, exchange,
    reload_sandbox, version_index,
};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

pub(crate) fn parse_select_arg(raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(ordinal) => Some(ordinal),
    }
}

pub(crate) fn format_chip(ordinal: usize, label: &str) -> String {
    if label.is_empty() {
        format!("V{ordinal}  (no label)")
    } else {
        format!("V{ordinal}  {label}")
    }
}

fn print_help() {
    println!("chat commands:");
    println!("  .help            show this help");
    println!("  .exit            quit");
    println!("  .code            print the editable buffer");
    println!("  .versions        list generated versions");
    println!("  .select <n>      activate version n");
    println!("  .revert          restore the active version's original code");
    println!("  .edit <path>     replace the buffer with a file's contents");
    println!("  .copy <path>     write the buffer to a file");
    println!("  .export <dir>    write the composed preview project");
    println!("  .preview [open]  show (or open) the browser preview");
    println!("Anything else is sent to the model as an instruction.");
}

struct ChatRuntime {
    session: Session,
    repair: RepairLoop,
    sandbox: Box<dyn Sandbox>,
    selection: ProviderSelection,
    model_override: Option<String>,
    max_repair_attempts: usize,
    progress: ProgressMode,
}

impl ChatRuntime {
    fn reload_and_repair(&mut self, service: &KilnService) -> Result<()> {
        // Artifact (or buffer) changed: any running countdown belongs to the
        // previous code and dies here.
        self.repair.clear_error();
        if !reload_sandbox(&self.session, self.sandbox.as_mut())? {
            return Ok(());
        }

        let progress = self.progress;
        let mut announced = false;
        drive_repair(
            &mut self.session,
            &mut self.repair,
            self.sandbox.as_mut(),
            service,
            self.selection,
            self.model_override.as_deref(),
            self.max_repair_attempts,
            &mut || thread::sleep(Duration::from_secs(1)),
            &mut |event| render_repair_event(event, progress, &mut announced),
        )?;
        Ok(())
    }

    fn send_instruction(&mut self, service: &KilnService, instruction: &str) -> Result<()> {
        let outcome = exchange(
            &mut self.session,
            service,
            self.selection,
            self.model_override.as_deref(),
            instruction,
        );

        match outcome {
            ExchangeOutcome::Artifact(turn_id) => {
                let store = self.session.store();
                if let Some(turn) = store.get(turn_id) {
                    if let Payload::Artifact(artifact) = &turn.payload {
                        if !artifact.description.is_empty() {
                            println!("{}", artifact.description);
                        }
                        let ordinal = version_index(store, turn_id).unwrap_or(0);
                        println!("[{}]", format_chip(ordinal, &artifact.version_label));
                    }
                }
                self.reload_and_repair(service)?;
            }
            ExchangeOutcome::Message(turn_id) | ExchangeOutcome::Fallback(turn_id) => {
                if let Some(turn) = self.session.store().get(turn_id) {
                    if let Payload::Message(message) = &turn.payload {
                        println!("{}", message.text);
                    }
                }
            }
            ExchangeOutcome::Discarded => {}
        }
        Ok(())
    }
}

fn render_repair_event(event: RepairEvent<'_>, progress: ProgressMode, announced: &mut bool) {
    if progress == ProgressMode::Silent {
        return;
    }
    match event {
        RepairEvent::Countdown { remaining, error } => {
            if !*announced {
                eprintln!("[kiln] Something went wrong:");
                eprintln!("{error}");
                *announced = true;
            }
            eprintln!("[kiln] Auto-fixing in {remaining}...");
        }
        RepairEvent::Dispatching { .. } => {
            eprintln!("[kiln] Fixing your code...");
        }
        RepairEvent::Landed { fixed } => {
            if fixed {
                eprintln!("[kiln] repaired version loaded cleanly");
            }
            *announced = false;
        }
        RepairEvent::Resolved => {}
        RepairEvent::AttemptsExhausted { attempts } => {
            eprintln!("[kiln] giving up after {attempts} repair attempt(s); edit or revert to continue");
        }
    }
}

pub(crate) fn chat_command(resolved: &RunDefaults, model_override: Option<String>) -> Result<()> {
    let service = build_service(resolved)?;
    let progress = resolved_progress_mode(resolved.progress, resolved.verbose);
    let mut runtime = ChatRuntime {
        session: Session::new(),
        repair: RepairLoop::new(resolved.countdown_secs),
        sandbox: build_sandbox(resolved)?,
        selection: runtime_context::provider_to_selection(resolved.provider),
        model_override,
        max_repair_attempts: resolved.max_repair_attempts,
        progress,
    };

    println!("Kiln chat. Describe the app you want. Type .help for commands, .exit to quit.");
    let mut line = String::new();
    loop {
        line.clear();
        print!("kiln> ");
        io::stdout().flush().context("failed flushing stdout")?;

        let bytes = io::stdin()
            .read_line(&mut line)
            .context("failed reading chat input")?;
        if bytes == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ".exit" {
            break;
        }
        if trimmed == ".help" {
            print_help();
            continue;
        }

        if let Some(command) = trimmed.strip_prefix('.') {
            if let Err(err) = run_dot_command(&mut runtime, &service, command) {
                eprintln!("error: {err:#}");
            }
            continue;
        }

        if let Err(err) = runtime.send_instruction(&service, trimmed) {
            eprintln!("error: {err:#}");
        }
    }

    Ok(())
}

fn run_dot_command(runtime: &mut ChatRuntime, service: &KilnService, command: &str) -> Result<()> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    match name {
        "code" => match runtime.session.buffer() {
            Some(buffer) => println!("{buffer}"),
            None => println!("No code to preview yet..."),
        },
        "versions" => {
            let entries = catalog(runtime.session.store());
            if entries.is_empty() {
                println!("no versions yet");
            } else {
                let active = runtime.session.active_turn();
                for entry in entries {
                    let marker = if active == Some(entry.turn_id) { "*" } else { " " };
                    println!("{marker} {}", format_chip(entry.ordinal, &entry.label));
                }
            }
        }
        "select" => {
            let ordinal = arg
                .and_then(parse_select_arg)
                .context("usage: .select <version number>")?;
            let entries = catalog(runtime.session.store());
            let entry = entries
                .iter()
                .find(|entry| entry.ordinal == ordinal)
                .with_context(|| format!("no version V{ordinal}"))?;
            runtime.session.select_version(entry.turn_id)?;
            println!("[{}]", format_chip(entry.ordinal, &entry.label));
            runtime.reload_and_repair(service)?;
        }
        "revert" => {
            if runtime.session.revert_buffer() {
                println!("reverted to the generated version");
                runtime.reload_and_repair(service)?;
            } else {
                println!("nothing to revert yet");
            }
        }
        "edit" => {
            let path = arg.context("usage: .edit <path>")?;
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed reading {path}"))?;
            if runtime.session.edit_buffer(contents) {
                runtime.reload_and_repair(service)?;
            } else {
                println!("no active version to edit yet");
            }
        }
        "copy" => {
            let path = arg.context("usage: .copy <path>")?;
            let buffer = runtime.session.buffer().context("no code to copy yet")?;
            fs::write(path, buffer).with_context(|| format!("failed writing {path}"))?;
            println!("copied code to {path}");
        }
        "export" => {
            let dir = arg.context("usage: .export <dir>")?;
            let buffer = runtime.session.buffer().context("no code to export yet")?;
            let dependencies = runtime
                .session
                .active_artifact()
                .map(|artifact| artifact.dependencies.clone())
                .unwrap_or_default();
            let project = SandboxProject::compose(buffer, &dependencies)?;
            project.write_to(Path::new(dir))?;
            println!("exported preview project to {dir}");
        }
        "preview" => match runtime.sandbox.preview_url() {
            Some(url) => {
                if arg == Some("open") {
                    crate::preview_server::open_url_in_default_browser(&url)?;
                    println!("opened {url}");
                } else {
                    println!("preview running at {url}");
                }
            }
            None => {
                println!(
                    "embedded sandbox has no browser preview; run with KILN_SANDBOX=browser or use .export"
                );
            }
        },
        other => {
            print_help();
            anyhow::bail!("unknown command '.{other}'");
        }
    }
    Ok(())
}
