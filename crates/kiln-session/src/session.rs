use crate::store::{Author, ConversationStore, Payload, TurnId};
use crate::versions::{self, SelectError};
use kiln_llm::{HistoryEntry, Role};
use kiln_protocol::{CodeArtifact, ConversationalText};

/// Dispatch-time tag for an outbound generation request. A reply is admitted
/// only while it is still the newest request and the version pointer has not
/// moved since dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    seq: u64,
    active_at_dispatch: Option<TurnId>,
}

/// Owns the conversation log, the active version pointer, and the editable
/// buffer. All mutation funnels through these methods; user edits never
/// touch the log.
#[derive(Debug, Default)]
pub struct Session {
    store: ConversationStore,
    active: Option<TurnId>,
    buffer: Option<String>,
    next_seq: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn submit_user(&mut self, text: &str) -> TurnId {
        self.store.append(
            Author::User,
            Payload::Message(ConversationalText {
                text: text.to_string(),
            }),
        )
    }

    /// A newly recorded artifact wins over unsaved edits: the pointer moves
    /// to it and the buffer re-seeds from its source.
    pub fn record_artifact(&mut self, artifact: CodeArtifact) -> TurnId {
        let source = artifact.source_code.clone();
        let id = self.store.append(Author::Assistant, Payload::Artifact(artifact));
        self.active = Some(id);
        self.buffer = Some(source);
        id
    }

    pub fn record_message(&mut self, message: ConversationalText) -> TurnId {
        self.store.append(Author::Assistant, Payload::Message(message))
    }

    pub fn record_fallback(&mut self, text: &str) -> TurnId {
        self.record_message(ConversationalText {
            text: text.to_string(),
        })
    }

    pub fn active_turn(&self) -> Option<TurnId> {
        self.active
    }

    pub fn active_artifact(&self) -> Option<&CodeArtifact> {
        self.active
            .and_then(|id| versions::artifact_for_turn(&self.store, id).ok())
    }

    pub fn buffer(&self) -> Option<&str> {
        self.buffer.as_deref()
    }

    pub fn has_artifact(&self) -> bool {
        self.active.is_some()
    }

    /// Writes the buffer only. Returns false (and does nothing) when no
    /// artifact is active, mirroring a disabled editor.
    pub fn edit_buffer(&mut self, new_text: impl Into<String>) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.buffer = Some(new_text.into());
        true
    }

    /// Re-seeds the buffer from the active artifact's original source,
    /// discarding divergence. No-op without an active artifact.
    pub fn revert_buffer(&mut self) -> bool {
        let Some(artifact) = self.active_artifact() else {
            return false;
        };
        let source = artifact.source_code.clone();
        self.buffer = Some(source);
        true
    }

    /// Moves the pointer to a historical artifact and re-seeds the buffer.
    /// Unsaved edits are discarded, last write wins.
    pub fn select_version(&mut self, turn_id: TurnId) -> Result<(), SelectError> {
        let artifact = versions::artifact_for_turn(&self.store, turn_id)?;
        let source = artifact.source_code.clone();
        self.active = Some(turn_id);
        self.buffer = Some(source);
        Ok(())
    }

    pub fn begin_request(&mut self) -> RequestTicket {
        self.next_seq += 1;
        RequestTicket {
            seq: self.next_seq,
            active_at_dispatch: self.active,
        }
    }

    pub fn admit_reply(&self, ticket: &RequestTicket) -> bool {
        ticket.seq == self.next_seq && ticket.active_at_dispatch == self.active
    }

    /// Chronological transcript of every turn so far. Artifact turns
    /// contribute their description, the visible half of the exchange.
    pub fn history_for_generation(&self) -> Vec<HistoryEntry> {
        self.store
            .turns()
            .iter()
            .map(|turn| HistoryEntry {
                role: match turn.author {
                    Author::User => Role::User,
                    Author::Assistant => Role::Assistant,
                },
                text: match &turn.payload {
                    Payload::Message(msg) => msg.text.clone(),
                    Payload::Artifact(artifact) => artifact.description.clone(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::versions::SelectError;
    use kiln_llm::Role;
    use kiln_protocol::CodeArtifact;
    use std::collections::BTreeMap;

    fn artifact(code: &str, label: &str) -> CodeArtifact {
        CodeArtifact {
            source_code: code.to_string(),
            dependencies: BTreeMap::new(),
            description: format!("{label} description"),
            version_label: label.to_string(),
        }
    }

    #[test]
    fn artifact_reply_seeds_pointer_and_buffer() {
        let mut session = Session::new();
        session.submit_user("build a card");
        let id = session.record_artifact(artifact("card code", "Card"));

        assert_eq!(session.active_turn(), Some(id));
        assert_eq!(session.buffer(), Some("card code"));
    }

    #[test]
    fn edits_never_touch_the_log() {
        let mut session = Session::new();
        session.submit_user("build a card");
        session.record_artifact(artifact("original", "Card"));
        let len_before = session.store().len();

        assert!(session.edit_buffer("edited by hand"));
        assert!(session.revert_buffer());
        assert_eq!(session.store().len(), len_before);
    }

    #[test]
    fn revert_restores_source_byte_for_byte() {
        let mut session = Session::new();
        session.record_artifact(artifact("const a = 1;\n", "One"));

        session.edit_buffer("const a = 2;");
        session.edit_buffer("garbage");
        assert!(session.revert_buffer());
        assert_eq!(session.buffer(), Some("const a = 1;\n"));
    }

    #[test]
    fn edit_and_revert_are_noops_without_artifact() {
        let mut session = Session::new();
        assert!(!session.edit_buffer("text"));
        assert!(!session.revert_buffer());
        assert_eq!(session.buffer(), None);
    }

    #[test]
    fn select_moves_pointer_and_discards_edits() {
        let mut session = Session::new();
        let first = session.record_artifact(artifact("v1", "One"));
        session.record_artifact(artifact("v2", "Two"));
        session.edit_buffer("unsaved work");
        let len_before = session.store().len();

        session.select_version(first).expect("select should pass");
        assert_eq!(session.active_turn(), Some(first));
        assert_eq!(session.buffer(), Some("v1"));
        assert_eq!(session.store().len(), len_before);
    }

    #[test]
    fn select_rejects_message_turns() {
        let mut session = Session::new();
        let user_turn = session.submit_user("hello");
        assert_eq!(
            session.select_version(user_turn),
            Err(SelectError::NotFound(user_turn))
        );
    }

    #[test]
    fn stale_reply_is_rejected_after_newer_dispatch() {
        let mut session = Session::new();
        let first = session.begin_request();
        let second = session.begin_request();

        assert!(!session.admit_reply(&first));
        assert!(session.admit_reply(&second));
    }

    #[test]
    fn stale_reply_is_rejected_after_pointer_move() {
        let mut session = Session::new();
        let v1 = session.record_artifact(artifact("v1", "One"));
        session.record_artifact(artifact("v2", "Two"));

        let ticket = session.begin_request();
        session.select_version(v1).expect("select should pass");
        assert!(!session.admit_reply(&ticket));
    }

    #[test]
    fn history_keeps_order_and_maps_artifacts_to_descriptions() {
        let mut session = Session::new();
        session.submit_user("build a card");
        session.record_artifact(artifact("code", "Card"));
        session.submit_user("make it blue");

        let history = session.history_for_generation();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].text, "Card description");
        assert_eq!(history[2].text, "make it blue");
    }
}
