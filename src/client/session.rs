//! Chat view state.
//!
//! `ChatSession` does no I/O. It is fed the results of store calls and channel
//! pushes and keeps the visible message list consistent: confirmed messages in
//! id order, each id at most once, followed by provisional entries for sends
//! that have not been confirmed yet.

use crate::infrastructure::entities::Message;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Sending,
    Receiving,
    /// History could not be loaded (access denied, unknown conversation).
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Live,
    /// No live subscription; the view is kept current by polling `list_messages`.
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryId {
    Provisional(Uuid),
    Confirmed(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub id: EntryId,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatEntry {
    pub fn is_provisional(&self) -> bool {
        matches!(self.id, EntryId::Provisional(_))
    }
}

impl From<Message> for ChatEntry {
    fn from(message: Message) -> Self {
        ChatEntry {
            id: EntryId::Confirmed(message.id),
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            created_at: Some(message.created_at),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("message body is empty")]
    EmptyBody,

    #[error("no pending send {0}")]
    UnknownSend(Uuid),
}

/// A send the view shows before the store has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub client_ref: Uuid,
    pub body: String,
}

#[derive(Debug)]
pub struct ChatSession {
    principal_id: String,
    conversation_id: String,
    state: SessionState,
    connectivity: Connectivity,
    entries: Vec<ChatEntry>,
    compose: String,
    /// Every message up to this id is known to be in `entries`.
    resume_id: Option<i64>,
}

impl ChatSession {
    pub fn new(principal_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        ChatSession {
            principal_id: principal_id.into(),
            conversation_id: conversation_id.into(),
            state: SessionState::Idle,
            connectivity: Connectivity::Live,
            entries: Vec::new(),
            compose: String::new(),
            resume_id: None,
        }
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn compose(&self) -> &str {
        &self.compose
    }

    pub fn set_compose(&mut self, text: impl Into<String>) {
        self.compose = text.into();
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_provisional()).count()
    }

    /// Highest confirmed id shown. Own sends count, so this is not a safe
    /// resume point; use `resume_id` for that.
    pub fn last_confirmed_id(&self) -> Option<i64> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.id {
                EntryId::Confirmed(id) => Some(id),
                EntryId::Provisional(_) => None,
            })
            .max()
    }

    /// The `since_id` to catch up from. Only history, reconcile results and
    /// pushes on a live channel move it; a confirmed send does not, since
    /// messages from others may sit below it unseen.
    pub fn resume_id(&self) -> Option<i64> {
        self.resume_id
    }

    /// View entered: `Idle -> Loading`.
    pub fn enter(&mut self) -> Result<(), SessionError> {
        self.require(&[SessionState::Idle], "enter")?;
        self.state = SessionState::Loading;
        Ok(())
    }

    /// History arrived: `Loading -> Ready`. Messages already pushed while
    /// loading are kept once. Returns how many entries were added.
    pub fn history_loaded(&mut self, history: Vec<Message>) -> Result<usize, SessionError> {
        self.require(&[SessionState::Loading], "load history")?;

        let added = history
            .into_iter()
            .filter(|message| self.insert_confirmed(message.clone()))
            .count();
        // pushes taken while loading came from a subscription opened before
        // the fetch, so together with it they leave no gap
        self.resume_id = self.last_confirmed_id();
        self.state = SessionState::Ready;
        Ok(added)
    }

    /// The conversation cannot be shown at all.
    pub fn fail(&mut self) -> Result<(), SessionError> {
        self.require(&[SessionState::Loading], "fail")?;
        self.state = SessionState::Failed;
        Ok(())
    }

    /// Shows `body` as a provisional entry and clears the compose input.
    pub fn begin_send(&mut self, body: &str) -> Result<PendingSend, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Sending], "send")?;
        if body.trim().is_empty() {
            return Err(SessionError::EmptyBody);
        }

        let pending = PendingSend {
            client_ref: Uuid::new_v4(),
            body: body.to_owned(),
        };
        self.entries.push(ChatEntry {
            id: EntryId::Provisional(pending.client_ref),
            sender_id: self.principal_id.clone(),
            sender_name: None,
            body: pending.body.clone(),
            created_at: None,
        });
        self.compose.clear();
        self.state = SessionState::Sending;
        Ok(pending)
    }

    /// The store accepted the send: the provisional entry becomes `message`.
    /// Safe to call after the channel echo already reconciled it.
    pub fn confirm_send(&mut self, client_ref: Uuid, message: Message) -> Result<(), SessionError> {
        self.require(&[SessionState::Sending, SessionState::Ready], "confirm send")?;

        self.remove_provisional(client_ref);
        self.insert_confirmed(message);
        self.settle();
        Ok(())
    }

    /// The store rejected the send: the provisional entry is dropped and its
    /// text goes back into the compose input. Returns the restored text.
    pub fn fail_send(&mut self, client_ref: Uuid) -> Result<String, SessionError> {
        self.require(&[SessionState::Sending, SessionState::Ready], "fail send")?;

        let entry = self
            .remove_provisional(client_ref)
            .ok_or(SessionError::UnknownSend(client_ref))?;
        self.compose = entry.body.clone();
        self.settle();
        Ok(entry.body)
    }

    /// A channel push. Returns `false` if the message was already shown.
    pub fn receive(&mut self, message: Message) -> Result<bool, SessionError> {
        self.require(
            &[SessionState::Loading, SessionState::Ready, SessionState::Sending],
            "receive",
        )?;

        let loading = self.state == SessionState::Loading;
        self.state = SessionState::Receiving;

        // our own echo may overtake the append response
        if message.sender_id == self.principal_id {
            if let Some(client_ref) = message.client_ref {
                self.remove_provisional(client_ref);
            }
        }
        let id = message.id;
        let added = self.insert_confirmed(message);
        if !loading && self.connectivity == Connectivity::Live {
            self.advance_resume(id);
        }

        if loading {
            self.state = SessionState::Loading;
        } else {
            self.settle();
        }
        Ok(added)
    }

    pub fn mark_reconnecting(&mut self) {
        self.connectivity = Connectivity::Reconnecting;
    }

    pub fn mark_live(&mut self) {
        self.connectivity = Connectivity::Live;
    }

    /// Merges a `list_messages(since_id)` result. Returns how many entries
    /// were added.
    pub fn reconcile(&mut self, messages: Vec<Message>) -> Result<usize, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Sending], "reconcile")?;

        let mut added = 0;
        for message in messages {
            if message.sender_id == self.principal_id {
                if let Some(client_ref) = message.client_ref {
                    self.remove_provisional(client_ref);
                }
            }
            let id = message.id;
            if self.insert_confirmed(message) {
                added += 1;
            }
            self.advance_resume(id);
        }
        self.settle();
        Ok(added)
    }

    /// View exited. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        true
    }

    fn require(&self, allowed: &[SessionState], action: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        if !allowed.contains(&self.state) {
            return Err(SessionError::InvalidTransition {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    fn advance_resume(&mut self, id: i64) {
        self.resume_id = Some(self.resume_id.map_or(id, |current| current.max(id)));
    }

    fn settle(&mut self) {
        self.state = if self.pending_count() > 0 {
            SessionState::Sending
        } else {
            SessionState::Ready
        };
    }

    fn remove_provisional(&mut self, client_ref: Uuid) -> Option<ChatEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == EntryId::Provisional(client_ref))?;
        Some(self.entries.remove(index))
    }

    /// Inserts in id order ahead of any provisional entries.
    fn insert_confirmed(&mut self, message: Message) -> bool {
        let mut index = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            match entry.id {
                EntryId::Confirmed(id) if id == message.id => return false,
                EntryId::Confirmed(id) if id > message.id => {
                    index = index.min(i);
                }
                EntryId::Provisional(_) => {
                    index = index.min(i);
                }
                EntryId::Confirmed(_) => {}
            }
        }

        self.entries.insert(index, ChatEntry::from(message));
        true
    }
}
