use crate::repair::{RepairAction, RepairLoop};
use crate::session::Session;
use crate::store::TurnId;
use anyhow::Result;
use kiln_llm::{GenerationRequest, GenerationService, ProviderSelection};
use kiln_protocol::{Reply, parse_reply};
use kiln_sandbox::Sandbox;

pub const NETWORK_FALLBACK_TEXT: &str = "Sorry, something went wrong.";
pub const MALFORMED_FALLBACK_TEXT: &str = "Something went wrong. Please try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Artifact(TurnId),
    Message(TurnId),
    Fallback(TurnId),
    Discarded,
}

/// The one pipeline every instruction goes through, user-typed or synthetic:
/// append the instruction as a user turn, generate against the full prior
/// history, classify, and append the reply. Failures degrade to fallback
/// conversational turns; nothing here aborts the session.
pub fn exchange<G>(
    session: &mut Session,
    service: &G,
    selection: ProviderSelection,
    model_override: Option<&str>,
    instruction: &str,
) -> ExchangeOutcome
where
    G: GenerationService + ?Sized,
{
    let history = session.history_for_generation();
    session.submit_user(instruction);
    let ticket = session.begin_request();

    let request = GenerationRequest {
        instruction: instruction.to_string(),
        history,
    };
    let generated = service.generate(selection, &request, model_override);

    if !session.admit_reply(&ticket) {
        return ExchangeOutcome::Discarded;
    }

    let raw = match generated {
        Ok(reply) => reply.raw,
        Err(_) => {
            return ExchangeOutcome::Fallback(session.record_fallback(NETWORK_FALLBACK_TEXT));
        }
    };

    match parse_reply(&raw) {
        Ok(Reply::Artifact(artifact)) => ExchangeOutcome::Artifact(session.record_artifact(artifact)),
        Ok(Reply::Message(message)) => ExchangeOutcome::Message(session.record_message(message)),
        Err(_) => ExchangeOutcome::Fallback(session.record_fallback(MALFORMED_FALLBACK_TEXT)),
    }
}

/// Pushes the editable buffer and the active artifact's dependencies into
/// the sandbox. Returns false when there is nothing to load yet.
pub fn reload_sandbox<S>(session: &Session, sandbox: &mut S) -> Result<bool>
where
    S: Sandbox + ?Sized,
{
    let Some(buffer) = session.buffer() else {
        return Ok(false);
    };
    let dependencies = session
        .active_artifact()
        .map(|artifact| artifact.dependencies.clone())
        .unwrap_or_default();
    sandbox.load(buffer, &dependencies)?;
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairEvent<'a> {
    Countdown { remaining: u32, error: &'a str },
    Dispatching { error: &'a str },
    Landed { fixed: bool },
    Resolved,
    AttemptsExhausted { attempts: usize },
}

/// Runs the error/countdown/dispatch cycle until the sandbox is clean or the
/// attempt cap is hit. `wait` supplies the one-second cadence (a no-op in
/// tests); `notify` renders the overlay. Returns the number of repair
/// requests sent.
#[allow(clippy::too_many_arguments)]
pub fn drive_repair<G, S>(
    session: &mut Session,
    repair: &mut RepairLoop,
    sandbox: &mut S,
    service: &G,
    selection: ProviderSelection,
    model_override: Option<&str>,
    max_attempts: usize,
    wait: &mut dyn FnMut(),
    notify: &mut dyn FnMut(RepairEvent<'_>),
) -> Result<usize>
where
    G: GenerationService + ?Sized,
    S: Sandbox + ?Sized,
{
    let mut attempts = 0_usize;

    loop {
        let Some(error) = sandbox.current_error() else {
            repair.clear_error();
            notify(RepairEvent::Resolved);
            return Ok(attempts);
        };

        if max_attempts != 0 && attempts >= max_attempts {
            notify(RepairEvent::AttemptsExhausted { attempts });
            return Ok(attempts);
        }

        repair.observe_error(&error.message);
        notify(RepairEvent::Countdown {
            remaining: repair.countdown_remaining(),
            error: &error.message,
        });
        wait();

        match repair.tick() {
            RepairAction::Hold => {}
            RepairAction::Dispatch(instruction) => {
                notify(RepairEvent::Dispatching {
                    error: &instruction,
                });
                attempts += 1;

                let outcome = exchange(session, service, selection, model_override, &instruction);
                repair.repair_landed();

                if matches!(outcome, ExchangeOutcome::Artifact(_)) {
                    reload_sandbox(session, sandbox)?;
                }
                notify(RepairEvent::Landed {
                    fixed: sandbox.current_error().is_none(),
                });
            }
        }
    }
}
