use kiln_protocol::{CodeArtifact, ConversationalText};

pub type TurnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Message(ConversationalText),
    Artifact(CodeArtifact),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub author: Author,
    pub payload: Payload,
}

impl Turn {
    pub fn artifact(&self) -> Option<&CodeArtifact> {
        match &self.payload {
            Payload::Artifact(artifact) => Some(artifact),
            Payload::Message(_) => None,
        }
    }
}

/// Append-only conversation log. Ids are minted here and strictly increase;
/// prior turns are never mutated or removed.
#[derive(Debug, Default)]
pub struct ConversationStore {
    turns: Vec<Turn>,
    next_id: TurnId,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, author: Author, payload: Payload) -> TurnId {
        self.next_id += 1;
        let id = self.next_id;
        self.turns.push(Turn {
            id,
            author,
            payload,
        });
        id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == id)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
