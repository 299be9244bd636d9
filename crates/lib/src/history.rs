//! History view: group the message log into (user → AI) pairs, newest first, with search.
//!
//! Groups are derived on every refresh and never mutated in place. [`HistoryPanel`] holds
//! the panel's own projection (independent of the live conversation) and drops refresh
//! results that arrive after the panel was closed or refreshed again.

use crate::message::{preview, Message, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user message and the AI reply that followed it. Either side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationGroup {
    pub user: Option<Message>,
    pub ai: Option<Message>,
}

impl ConversationGroup {
    fn standalone_ai(m: &Message) -> Self {
        Self {
            user: None,
            ai: Some(m.clone()),
        }
    }

    /// Message to scroll to when this group is selected: the user message, else the reply.
    pub fn anchor(&self) -> Option<&Message> {
        self.user.as_ref().or(self.ai.as_ref())
    }

    /// User text and AI text joined by a space (missing sides are empty), trimmed.
    pub fn text(&self) -> String {
        let user = self.user.as_ref().map(|m| m.text.as_str()).unwrap_or("");
        let ai = self.ai.as_ref().map(|m| m.text.as_str()).unwrap_or("");
        format!("{} {}", user, ai).trim().to_string()
    }

    /// Display time: the user message's, else the reply's.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.anchor().map(|m| m.timestamp)
    }

    pub fn user_preview(&self, max_chars: usize) -> Option<String> {
        self.user
            .as_ref()
            .filter(|m| !m.text.is_empty())
            .map(|m| preview(&m.text, max_chars))
    }

    pub fn ai_preview(&self, max_chars: usize) -> Option<String> {
        self.ai.as_ref().map(|m| preview(&m.text, max_chars))
    }

    fn matches(&self, needle: &str) -> bool {
        self.text().to_lowercase().contains(needle)
    }
}

/// How a bot message attaches to the open group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupingMode {
    /// The first reply closes the group; further bot messages become standalone groups.
    #[default]
    CloseOnReply,
    /// Every bot message overwrites the open group's reply, so the last one wins.
    /// Only the overwritten replies are lost; orphans and unknown senders are still kept.
    OverwriteReply,
}

/// Group `messages` with [`GroupingMode::CloseOnReply`].
pub fn group(messages: &[Message]) -> Vec<ConversationGroup> {
    group_with(messages, GroupingMode::CloseOnReply)
}

/// Sort by timestamp (stable), pair each user message with the following reply, newest first.
pub fn group_with(messages: &[Message], mode: GroupingMode) -> Vec<ConversationGroup> {
    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by_key(|m| m.timestamp);

    let mut groups: Vec<ConversationGroup> = Vec::new();
    let mut open: Option<usize> = None;
    for m in sorted {
        match m.sender {
            Sender::User => {
                groups.push(ConversationGroup {
                    user: Some(m.clone()),
                    ai: None,
                });
                open = Some(groups.len() - 1);
            }
            Sender::Bot => match open {
                Some(i) => {
                    groups[i].ai = Some(m.clone());
                    if mode == GroupingMode::CloseOnReply {
                        open = None;
                    }
                }
                None => groups.push(ConversationGroup::standalone_ai(m)),
            },
            Sender::Unknown => {
                groups.push(ConversationGroup::standalone_ai(m));
                open = None;
            }
        }
    }

    groups.reverse();
    groups
}

/// Groups whose combined text contains `query`, case-insensitively. Blank query keeps all.
pub fn search<'a>(groups: &'a [ConversationGroup], query: &str) -> Vec<&'a ConversationGroup> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return groups.iter().collect();
    }
    groups.iter().filter(|g| g.matches(&needle)).collect()
}

/// Ticket for one history refresh; only the latest ticket of an open panel is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    generation: u64,
}

/// State of the history side panel.
#[derive(Debug, Clone, Default)]
pub struct HistoryPanel {
    open: bool,
    loading: bool,
    groups: Vec<ConversationGroup>,
    query: String,
    generation: u64,
    mode: GroupingMode,
}

impl HistoryPanel {
    pub fn new(mode: GroupingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    /// Close the panel; any refresh still in flight is discarded when it lands.
    pub fn close(&mut self) {
        self.open = false;
        self.loading = false;
        self.generation += 1;
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.generation += 1;
        self.loading = true;
        RefreshTicket {
            generation: self.generation,
        }
    }

    /// Apply a fetched message log. Returns false when the ticket is stale or the panel closed.
    /// A failed fetch empties the panel.
    pub fn finish_refresh<E: std::fmt::Display>(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<Message>, E>,
    ) -> bool {
        if !self.open || ticket.generation != self.generation {
            log::debug!("discarding stale history refresh");
            return false;
        }
        self.loading = false;
        match result {
            Ok(messages) => self.groups = group_with(&messages, self.mode),
            Err(e) => {
                log::error!("failed to load history: {}", e);
                self.groups.clear();
            }
        }
        true
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// All groups of the last refresh, newest first.
    pub fn groups(&self) -> &[ConversationGroup] {
        &self.groups
    }

    /// Groups matching the current query.
    pub fn visible(&self) -> Vec<&ConversationGroup> {
        search(&self.groups, &self.query)
    }

    /// Select the `index`-th visible group: closes the panel and returns its anchor message.
    pub fn select(&mut self, index: usize) -> Option<Message> {
        let anchor = self.visible().get(index).and_then(|g| g.anchor()).cloned();
        if anchor.is_some() {
            self.close();
        }
        anchor
    }
}
