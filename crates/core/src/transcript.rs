//! Transcript-related types.

use chatline_model::{ModelMessage, ModelRequest};

/// Who wrote a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The person using the widget.
    User,
    /// The model.
    Assistant,
}

/// One entry in the conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    text: String,
    frozen: bool,
}

impl Turn {
    /// User turns are frozen from the start.
    #[inline]
    pub(crate) fn user(text: String) -> Self {
        Self {
            role: Role::User,
            text,
            frozen: true,
        }
    }

    #[inline]
    pub(crate) fn assistant(text: String) -> Self {
        Self {
            role: Role::Assistant,
            text,
            frozen: false,
        }
    }

    /// Returns who wrote this turn.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text of this turn.
    ///
    /// For an assistant turn whose reply is still arriving, this is the
    /// text received so far.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns `true` if the text of this turn can no longer change.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn to_message(&self) -> ModelMessage {
        match self.role {
            Role::User => ModelMessage::User(self.text.clone()),
            Role::Assistant => ModelMessage::Assistant(self.text.clone()),
        }
    }
}

/// The ordered log of all turns of one conversation.
///
/// Turns are only ever appended, so an index into the transcript stays
/// valid for its whole lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Returns all turns, oldest first.
    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Returns the turn at `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Turn> {
        self.turns.get(idx)
    }

    /// Returns the latest turn.
    #[inline]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Returns the number of turns.
    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if nothing has been said yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns `true` if the roles alternate, starting with the user.
    pub fn roles_alternate(&self) -> bool {
        self.turns.iter().enumerate().all(|(idx, turn)| {
            let expected = if idx % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            turn.role == expected
        })
    }

    /// Appends a turn and returns its index.
    #[inline]
    pub(crate) fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Appends text to the turn at `idx`. Returns `false` if the turn is
    /// missing or frozen, in which case nothing changes.
    pub(crate) fn extend(&mut self, idx: usize, text: &str) -> bool {
        match self.turns.get_mut(idx) {
            Some(turn) if !turn.frozen => {
                turn.text.push_str(text);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn freeze(&mut self, idx: usize) {
        if let Some(turn) = self.turns.get_mut(idx) {
            turn.frozen = true;
        }
    }

    /// Builds the request carrying the whole history.
    pub(crate) fn to_request(&self) -> ModelRequest {
        ModelRequest {
            messages: self.turns.iter().map(Turn::to_message).collect(),
        }
    }
}

/// A mutation of the transcript, reported to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Change {
    /// A turn was appended at the given index.
    Appended(usize),
    /// The text of the turn at the given index grew.
    Extended(usize),
    /// The turn at the given index will not change anymore.
    Frozen(usize),
}

impl Change {
    /// Returns the index of the affected turn.
    #[inline]
    pub fn index(&self) -> usize {
        match *self {
            Change::Appended(idx) | Change::Extended(idx) | Change::Frozen(idx) => {
                idx
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_turns_refuse_text() {
        let mut transcript = Transcript::default();
        let user_idx = transcript.push(Turn::user("Hi".to_owned()));
        let reply_idx = transcript.push(Turn::assistant("He".to_owned()));

        assert!(!transcript.extend(user_idx, "!"));
        assert!(transcript.extend(reply_idx, "llo"));
        transcript.freeze(reply_idx);
        assert!(!transcript.extend(reply_idx, "!"));
        assert!(!transcript.extend(42, "?"));

        assert_eq!(transcript.turns()[0].text(), "Hi");
        assert_eq!(transcript.turns()[1].text(), "Hello");
        assert!(transcript.turns().iter().all(Turn::is_frozen));
    }

    #[test]
    fn test_roles_alternate() {
        let mut transcript = Transcript::default();
        assert!(transcript.roles_alternate());
        transcript.push(Turn::user("Hi".to_owned()));
        transcript.push(Turn::assistant("Hello".to_owned()));
        assert!(transcript.roles_alternate());
        transcript.push(Turn::assistant("Again".to_owned()));
        assert!(!transcript.roles_alternate());
    }

    #[test]
    fn test_to_request() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::user("Hi".to_owned()));
        transcript.push(Turn::assistant("Hello!".to_owned()));
        transcript.push(Turn::user("Bye".to_owned()));
        assert_eq!(
            transcript.to_request().messages,
            [
                ModelMessage::User("Hi".to_owned()),
                ModelMessage::Assistant("Hello!".to_owned()),
                ModelMessage::User("Bye".to_owned()),
            ]
        );
    }
}
