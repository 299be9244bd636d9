//! Chat session: drives [`ConversationState`] and [`HistoryPanel`] against a backend.
//!
//! All failures degrade to visible state (kept list, error notice, empty panel) and are logged;
//! the error is still returned so front-ends can report it.

use crate::api::{ApiError, MessageBackend};
use crate::history::HistoryPanel;
use crate::message::{Message, MessageKind};
use crate::reconcile::{ConversationState, Exchange, PendingToken, SubmitOutcome, SubmitRejected};

/// One live conversation bound to a backend.
pub struct ChatSession<B> {
    backend: B,
    state: ConversationState,
}

/// Clears the pending flag if the submit future is dropped before the backend answers.
struct PendingGuard<'a> {
    state: &'a mut ConversationState,
    token: Option<PendingToken>,
}

impl PendingGuard<'_> {
    fn complete(mut self, result: Result<Exchange, ApiError>) -> SubmitOutcome {
        match self.token.take() {
            Some(token) => self.state.complete_submit(&token, result),
            None => SubmitOutcome::Stale,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            log::debug!("submission {} dropped before completion", token.temp_id());
            self.state.abandon_submit(&token);
        }
    }
}

impl<B: MessageBackend> ChatSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: ConversationState::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        self.state.messages()
    }

    /// Replace the visible list with the server log. On failure the list is left as it was.
    pub async fn load(&mut self) -> Result<usize, ApiError> {
        match self.backend.fetch_messages().await {
            Ok(messages) => {
                let n = messages.len();
                self.state.replace_all(messages);
                Ok(n)
            }
            Err(e) => {
                log::error!("failed to load chat history: {}", e);
                Err(e)
            }
        }
    }

    /// Send `text`: optimistic insert, then replace with the confirmed pair or append an
    /// error notice. The in-flight flag is cleared on every path, including cancellation.
    pub async fn submit(
        &mut self,
        text: &str,
        kind: MessageKind,
    ) -> Result<SubmitOutcome, SubmitRejected> {
        let token = self.state.begin_submit(text, kind)?;
        let body = token.text().to_string();
        let guard = PendingGuard {
            state: &mut self.state,
            token: Some(token),
        };
        let result = self.backend.post_message(&body, kind).await;
        Ok(guard.complete(result))
    }

    /// Clear the visible list only.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Delete the conversation on the server, then clear locally. If the server refuses,
    /// local state is kept so the client never shows empty while the server still has data.
    pub async fn reset_all(&mut self) -> Result<(), ApiError> {
        match self.backend.delete_messages().await {
            Ok(()) => {
                self.state.reset();
                Ok(())
            }
            Err(e) => {
                log::error!("failed to clear server messages: {}", e);
                Err(e)
            }
        }
    }

    /// Open `panel` (if closed) and refresh it.
    pub async fn open_history(&self, panel: &mut HistoryPanel) -> bool {
        panel.open();
        self.refresh_history(panel).await
    }

    /// Fetch the log fresh and regroup it into `panel`. Independent of the live list.
    /// Returns false if the result was discarded.
    pub async fn refresh_history(&self, panel: &mut HistoryPanel) -> bool {
        let ticket = panel.begin_refresh();
        let result = self.backend.fetch_messages().await;
        panel.finish_refresh(ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Sender, ERROR_ID_PREFIX};
    use crate::reconcile::SEND_FAILED_TEXT;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedBackend {
        log: Vec<Message>,
        fail_fetch: bool,
        fail_post: bool,
        fail_delete: bool,
        hang_post: bool,
        posted: Mutex<Vec<(String, MessageKind)>>,
    }

    fn msg(id: &str, sender: Sender, text: &str) -> Message {
        Message {
            id: id.to_string(),
            text: text.to_string(),
            sender,
            kind: MessageKind::Text,
            timestamp: Utc::now(),
        }
    }

    #[async_trait]
    impl MessageBackend for ScriptedBackend {
        async fn fetch_messages(&self) -> Result<Vec<Message>, ApiError> {
            if self.fail_fetch {
                return Err(ApiError::Rejected("offline".into()));
            }
            Ok(self.log.clone())
        }

        async fn post_message(&self, text: &str, kind: MessageKind) -> Result<Exchange, ApiError> {
            self.posted.lock().unwrap().push((text.to_string(), kind));
            if self.hang_post {
                std::future::pending::<()>().await;
            }
            if self.fail_post {
                return Err(ApiError::Rejected("model offline".into()));
            }
            Ok(Exchange {
                user_message: Some(msg("srv-u", Sender::User, text)),
                ai_message: Some(msg("srv-a", Sender::Bot, "reply")),
            })
        }

        async fn delete_messages(&self) -> Result<(), ApiError> {
            if self.fail_delete {
                return Err(ApiError::Rejected("nope".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_replaces_and_failure_keeps() {
        let mut session = ChatSession::new(ScriptedBackend {
            log: vec![msg("1", Sender::User, "hi"), msg("2", Sender::Bot, "hey")],
            ..Default::default()
        });
        assert_eq!(session.load().await.expect("load"), 2);
        assert_eq!(session.messages().len(), 2);

        let mut failing = ChatSession::new(ScriptedBackend {
            fail_fetch: true,
            ..Default::default()
        });
        failing.submit("kept", MessageKind::Text).await.expect("submitted");
        let before = failing.messages().to_vec();
        assert!(failing.load().await.is_err());
        assert_eq!(failing.messages(), &before[..]);
    }

    #[tokio::test]
    async fn submit_success_sends_trimmed_text() {
        let mut session = ChatSession::new(ScriptedBackend::default());
        let outcome = session
            .submit("  draw a fox ", MessageKind::Image)
            .await
            .expect("submitted");
        assert_eq!(outcome, SubmitOutcome::Confirmed { appended: 2 });
        assert!(!session.state().in_flight());
        let ids: Vec<&str> = session.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["srv-u", "srv-a"]);
        assert_eq!(
            session.backend().posted.lock().unwrap().as_slice(),
            &[("draw a fox".to_string(), MessageKind::Image)]
        );
    }

    #[tokio::test]
    async fn submit_failure_appends_notice() {
        let mut session = ChatSession::new(ScriptedBackend {
            fail_post: true,
            ..Default::default()
        });
        let outcome = session.submit("hi", MessageKind::Text).await.expect("submitted");
        assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
        assert!(!session.state().in_flight());
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_local());
        assert_eq!(messages[0].text, "hi");
        assert!(messages[1].id.starts_with(ERROR_ID_PREFIX));
        assert_eq!(messages[1].text, SEND_FAILED_TEXT);
    }

    #[tokio::test]
    async fn blank_submit_never_reaches_backend() {
        let mut session = ChatSession::new(ScriptedBackend::default());
        assert_eq!(
            session.submit("  \n", MessageKind::Text).await,
            Err(SubmitRejected::EmptyText)
        );
        assert!(session.backend().posted.lock().unwrap().is_empty());
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn cancelled_submit_clears_in_flight() {
        let mut session = ChatSession::new(ScriptedBackend {
            hang_post: true,
            ..Default::default()
        });
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            session.submit("hello", MessageKind::Text),
        )
        .await;
        assert!(res.is_err());
        assert!(!session.state().in_flight());
        assert_eq!(session.messages().len(), 1);
        assert!(session.messages()[0].is_local());
    }

    #[tokio::test]
    async fn reset_all_keeps_local_state_on_failure() {
        let mut session = ChatSession::new(ScriptedBackend {
            log: vec![msg("1", Sender::User, "hi")],
            fail_delete: true,
            ..Default::default()
        });
        session.load().await.expect("load");
        assert!(session.reset_all().await.is_err());
        assert_eq!(session.messages().len(), 1);

        let mut session = ChatSession::new(ScriptedBackend {
            log: vec![msg("1", Sender::User, "hi")],
            ..Default::default()
        });
        session.load().await.expect("load");
        session.reset_all().await.expect("reset");
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn history_is_independent_of_live_list() {
        let session = ChatSession::new(ScriptedBackend {
            log: vec![msg("1", Sender::User, "hi"), msg("2", Sender::Bot, "hey")],
            ..Default::default()
        });
        let mut panel = HistoryPanel::default();
        assert!(session.open_history(&mut panel).await);
        assert!(panel.is_open());
        assert_eq!(panel.groups().len(), 1);
        assert!(session.messages().is_empty());
    }
}
