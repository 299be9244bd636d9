//! Live conversation state: optimistic insert, server-confirmed replace, error fallback.
//!
//! Submitting is a two-phase protocol. [`ConversationState::begin_submit`] appends the
//! optimistic user message and hands back a [`PendingToken`]; once the backend answers,
//! [`ConversationState::complete_submit`] swaps the optimistic entry for the confirmed
//! messages (or appends an error notice). Only one submission may be pending at a time.

use crate::message::{Message, MessageKind};

/// Text of the bot message appended when a send fails.
pub const SEND_FAILED_TEXT: &str = "⚠️ Something went wrong. Please try again.";

/// Server-confirmed result of one send. Either side may be missing on a partial response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exchange {
    pub user_message: Option<Message>,
    pub ai_message: Option<Message>,
}

/// Handle for the submission started by `begin_submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToken {
    temp_id: String,
    text: String,
    kind: MessageKind,
}

impl PendingToken {
    /// Id of the optimistic message this submission inserted.
    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }

    /// Trimmed text to send.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

/// Why a submission was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejected {
    #[error("message is empty")]
    EmptyText,
    #[error("a message is already being sent")]
    InFlight,
}

/// What `complete_submit` did with a backend result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Optimistic entry replaced; `appended` confirmed messages were added (0..=2).
    Confirmed { appended: usize },
    /// Optimistic entry kept and an error notice with `error_id` appended.
    Failed { error_id: String },
    /// Token did not match the pending submission; nothing changed.
    Stale,
}

/// Messages shown to the user plus the at-most-one pending submission.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    pending: Option<PendingToken>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True while a submission is waiting for the backend.
    pub fn in_flight(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingToken> {
        self.pending.as_ref()
    }

    /// Replace the whole visible list (after a successful load).
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Clear the visible list. A pending submission stays pending.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Index of the message with `id` in the visible list.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Start a submission: append an optimistic user message and mark it pending.
    pub fn begin_submit(
        &mut self,
        text: &str,
        kind: MessageKind,
    ) -> Result<PendingToken, SubmitRejected> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitRejected::EmptyText);
        }
        if self.pending.is_some() {
            return Err(SubmitRejected::InFlight);
        }
        let optimistic = Message::optimistic(text, kind);
        let token = PendingToken {
            temp_id: optimistic.id.clone(),
            text: text.to_string(),
            kind,
        };
        self.messages.push(optimistic);
        self.pending = Some(token.clone());
        Ok(token)
    }

    /// Apply the backend result for `token` and clear the pending flag.
    ///
    /// On success the optimistic message (matched by id, never by text) is removed and the
    /// confirmed user and AI messages are appended in that order. On failure the optimistic
    /// message stays and an error notice follows it.
    pub fn complete_submit<E: std::fmt::Display>(
        &mut self,
        token: &PendingToken,
        result: Result<Exchange, E>,
    ) -> SubmitOutcome {
        if self.pending.as_ref() != Some(token) {
            log::debug!("discarding result for stale submission {}", token.temp_id);
            return SubmitOutcome::Stale;
        }
        self.pending = None;
        match result {
            Ok(exchange) => {
                self.messages.retain(|m| m.id != token.temp_id);
                let before = self.messages.len();
                self.messages.extend(exchange.user_message);
                self.messages.extend(exchange.ai_message);
                SubmitOutcome::Confirmed {
                    appended: self.messages.len() - before,
                }
            }
            Err(e) => {
                log::error!("message send failed: {}", e);
                let notice = Message::error_notice(SEND_FAILED_TEXT);
                let error_id = notice.id.clone();
                self.messages.push(notice);
                SubmitOutcome::Failed { error_id }
            }
        }
    }

    /// Drop the pending flag without a result (the awaiting task went away).
    /// The optimistic message stays visible. Returns false if `token` was not pending.
    pub fn abandon_submit(&mut self, token: &PendingToken) -> bool {
        if self.pending.as_ref() == Some(token) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
