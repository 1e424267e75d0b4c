use crate::store::{ConversationStore, TurnId};
use kiln_protocol::CodeArtifact;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("turn {0} does not carry a code artifact")]
    NotFound(TurnId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub ordinal: usize,
    pub turn_id: TurnId,
    pub label: String,
}

/// Payload of the most recent artifact-bearing turn, scanning from the end.
pub fn latest_artifact(store: &ConversationStore) -> Option<(TurnId, &CodeArtifact)> {
    store
        .turns()
        .iter()
        .rev()
        .find_map(|turn| turn.artifact().map(|artifact| (turn.id, artifact)))
}

pub fn artifact_for_turn(
    store: &ConversationStore,
    turn_id: TurnId,
) -> Result<&CodeArtifact, SelectError> {
    store
        .get(turn_id)
        .and_then(|turn| turn.artifact())
        .ok_or(SelectError::NotFound(turn_id))
}

/// 1-based ordinal among artifact-bearing turns, chronological. Display
/// labeling only; recomputed per call.
pub fn version_index(store: &ConversationStore, turn_id: TurnId) -> Option<usize> {
    store
        .turns()
        .iter()
        .filter(|turn| turn.artifact().is_some())
        .position(|turn| turn.id == turn_id)
        .map(|position| position + 1)
}

pub fn catalog(store: &ConversationStore) -> Vec<VersionEntry> {
    store
        .turns()
        .iter()
        .filter_map(|turn| turn.artifact().map(|artifact| (turn.id, artifact)))
        .enumerate()
        .map(|(index, (turn_id, artifact))| VersionEntry {
            ordinal: index + 1,
            turn_id,
            label: artifact.version_label.clone(),
        })
        .collect()
}
