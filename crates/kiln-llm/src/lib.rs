use anyhow::{Result, anyhow};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Relay,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelection {
    Auto,
    Relay,
    OpenAiCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub provider: Provider,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Chronological transcript exactly as accumulated, with the new
/// instruction carried separately so backends can append it last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub instruction: String,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReply {
    pub raw: String,
    pub provider: Provider,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generation transport failed: {message}")]
pub struct NetworkError {
    pub message: String,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: Provider,
    pub stage: &'static str,
    pub error: String,
}

#[derive(Debug, Error)]
#[error("generation routing failed after {attempts:?}")]
pub struct ProviderRoutingError {
    pub attempts: Vec<ProviderAttempt>,
}

pub trait GenerationBackend {
    fn generate(&self, req: &GenerationRequest, model: &str) -> Result<String>;
}

pub trait ReachabilityProbe {
    fn relay_reachable(&self) -> bool;
}

pub trait GenerationService {
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor>;
    fn generate(
        &self,
        selection: ProviderSelection,
        req: &GenerationRequest,
        model_override: Option<&str>,
    ) -> Result<GenerationReply>;
}

pub fn ensure_nonempty_reply(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("model returned empty reply"));
    }
    Ok(trimmed.to_string())
}

pub struct ProviderRouter<R, P, B>
where
    R: GenerationBackend,
    P: GenerationBackend,
    B: ReachabilityProbe,
{
    pub relay: R,
    pub openai: P,
    pub reachability: B,
    pub relay_model: String,
    pub openai_model: String,
}

impl<R, P, B> ProviderRouter<R, P, B>
where
    R: GenerationBackend,
    P: GenerationBackend,
    B: ReachabilityProbe,
{
    fn call_provider(
        &self,
        provider: Provider,
        req: &GenerationRequest,
        model_override: Option<&str>,
    ) -> Result<GenerationReply> {
        match provider {
            Provider::Relay => {
                let model = model_override.unwrap_or(&self.relay_model);
                let output = self.relay.generate(req, model)?;
                Ok(GenerationReply {
                    raw: ensure_nonempty_reply(&output)?,
                    provider,
                    model: model.to_string(),
                })
            }
            Provider::OpenAiCompatible => {
                let model = model_override.unwrap_or(&self.openai_model);
                let output = self.openai.generate(req, model)?;
                Ok(GenerationReply {
                    raw: ensure_nonempty_reply(&output)?,
                    provider,
                    model: model.to_string(),
                })
            }
        }
    }
}

impl<R, P, B> GenerationService for ProviderRouter<R, P, B>
where
    R: GenerationBackend,
    P: GenerationBackend,
    B: ReachabilityProbe,
{
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor> {
        match selection {
            ProviderSelection::Relay => vec![ProviderDescriptor {
                provider: Provider::Relay,
                model: self.relay_model.clone(),
            }],
            ProviderSelection::OpenAiCompatible => vec![ProviderDescriptor {
                provider: Provider::OpenAiCompatible,
                model: self.openai_model.clone(),
            }],
            ProviderSelection::Auto => {
                if self.reachability.relay_reachable() {
                    vec![
                        ProviderDescriptor {
                            provider: Provider::Relay,
                            model: self.relay_model.clone(),
                        },
                        ProviderDescriptor {
                            provider: Provider::OpenAiCompatible,
                            model: self.openai_model.clone(),
                        },
                    ]
                } else {
                    vec![ProviderDescriptor {
                        provider: Provider::OpenAiCompatible,
                        model: self.openai_model.clone(),
                    }]
                }
            }
        }
    }

    fn generate(
        &self,
        selection: ProviderSelection,
        req: &GenerationRequest,
        model_override: Option<&str>,
    ) -> Result<GenerationReply> {
        let chain = self.candidate_chain(selection);
        let mut attempts = Vec::new();

        for entry in chain {
            match self.call_provider(entry.provider, req, model_override) {
                Ok(reply) => return Ok(reply),
                Err(err) => attempts.push(ProviderAttempt {
                    provider: entry.provider,
                    stage: "generate",
                    error: format!("{err:#}"),
                }),
            }
        }

        Err(ProviderRoutingError { attempts }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        GenerationBackend, GenerationRequest, GenerationService, HistoryEntry, NetworkError,
        Provider, ProviderDescriptor, ProviderRouter, ProviderRoutingError, ProviderSelection,
        ReachabilityProbe, Role, ensure_nonempty_reply,
    };
    use anyhow::{Result, anyhow};

    struct StubBackend {
        fail: bool,
        output: String,
    }

    impl GenerationBackend for StubBackend {
        fn generate(&self, _req: &GenerationRequest, _model: &str) -> Result<String> {
            if self.fail {
                return Err(NetworkError::new("stub transport down").into());
            }
            Ok(self.output.clone())
        }
    }

    struct Probe(bool);

    impl ReachabilityProbe for Probe {
        fn relay_reachable(&self) -> bool {
            self.0
        }
    }

    fn req() -> GenerationRequest {
        GenerationRequest {
            instruction: "build a todo app".to_string(),
            history: vec![HistoryEntry {
                role: Role::User,
                text: "hello".to_string(),
            }],
        }
    }

    fn router(relay_fail: bool, reachable: bool) -> ProviderRouter<StubBackend, StubBackend, Probe> {
        ProviderRouter {
            relay: StubBackend {
                fail: relay_fail,
                output: r#"{"text":"from relay"}"#.to_string(),
            },
            openai: StubBackend {
                fail: false,
                output: r#"{"text":"from openai"}"#.to_string(),
            },
            reachability: Probe(reachable),
            relay_model: "relay-model".to_string(),
            openai_model: "openai-model".to_string(),
        }
    }

    #[test]
    fn rejects_empty_reply() {
        let err = ensure_nonempty_reply("   ").expect_err("must fail");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn auto_prefers_relay_when_reachable() {
        let chain = router(false, true).candidate_chain(ProviderSelection::Auto);
        assert_eq!(chain[0].provider, Provider::Relay);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn auto_skips_relay_when_unreachable() {
        let chain = router(false, false).candidate_chain(ProviderSelection::Auto);
        assert_eq!(
            chain,
            vec![ProviderDescriptor {
                provider: Provider::OpenAiCompatible,
                model: "openai-model".to_string()
            }]
        );
    }

    #[test]
    fn auto_falls_back_to_openai_on_relay_failure() {
        let reply = router(true, true)
            .generate(ProviderSelection::Auto, &req(), None)
            .expect("fallback should work");
        assert_eq!(reply.provider, Provider::OpenAiCompatible);
        assert_eq!(reply.raw, r#"{"text":"from openai"}"#);
    }

    #[test]
    fn explicit_selection_pins_single_candidate() {
        let reply = router(true, true)
            .generate(ProviderSelection::OpenAiCompatible, &req(), None)
            .expect("openai path should work");
        assert_eq!(reply.provider, Provider::OpenAiCompatible);
        assert_eq!(reply.model, "openai-model");
    }

    #[test]
    fn exhausted_chain_reports_every_attempt() {
        let mut router = router(true, true);
        router.openai.fail = true;

        let err = router
            .generate(ProviderSelection::Auto, &req(), None)
            .expect_err("both candidates should fail");
        let routing = err
            .downcast_ref::<ProviderRoutingError>()
            .expect("routing error");
        assert_eq!(routing.attempts.len(), 2);
        assert_eq!(routing.attempts[0].provider, Provider::Relay);
        assert!(routing.attempts[0].error.contains("transport"));
    }

    #[test]
    fn model_override_applies_to_selected_provider() {
        let reply = router(false, true)
            .generate(ProviderSelection::Relay, &req(), Some("pinned"))
            .expect("relay path should work");
        assert_eq!(reply.model, "pinned");
    }

    #[test]
    fn transport_failure_is_downcastable() {
        let backend = StubBackend {
            fail: true,
            output: String::new(),
        };
        let err = backend.generate(&req(), "m").expect_err("must fail");
        assert!(err.downcast_ref::<NetworkError>().is_some());
    }
}
