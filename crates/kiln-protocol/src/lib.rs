use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationalText {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeArtifact {
    pub source_code: String,
    pub dependencies: BTreeMap<String, String>,
    pub description: String,
    pub version_label: String,
}

/// Classified model reply. Consumers match on the variant instead of
/// sniffing shapes at every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(ConversationalText),
    Artifact(CodeArtifact),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed model reply: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
}

impl MalformedResponse {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    res: Option<ArtifactBody>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "versionLabel")]
    version_label: String,
}

/// Drops a surrounding code fence (with optional language tag) without
/// touching interior content.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut trimmed = raw.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = match rest.split_once('\n') {
            Some((_tag, body)) => body,
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
        if let Some(body) = trimmed.trim_end().strip_suffix("```") {
            trimmed = body;
        }
        trimmed = trimmed.trim();
    }

    trimmed
}

pub fn parse_reply(raw: &str) -> Result<Reply, MalformedResponse> {
    let cleaned = strip_code_fences(raw);

    if !cleaned.starts_with('{') {
        return Err(MalformedResponse::new("reply is not a JSON object"));
    }

    let envelope: Envelope = serde_json::from_str(cleaned)
        .map_err(|err| MalformedResponse::new(format!("invalid JSON: {err}")))?;

    // Ambiguity policy: a non-empty artifact wins over a non-empty text.
    if let Some(body) = envelope.res {
        if !body.code.is_empty() {
            return Ok(Reply::Artifact(CodeArtifact {
                source_code: body.code,
                dependencies: body.dependencies,
                description: body.description,
                version_label: body.version_label,
            }));
        }
    }

    if let Some(text) = envelope.text {
        if !text.is_empty() {
            return Ok(Reply::Message(ConversationalText { text }));
        }
    }

    Err(MalformedResponse::new(
        "JSON matched neither the artifact nor the message shape",
    ))
}
