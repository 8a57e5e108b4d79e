//! Client session adapter: drives a `ChatSession` against a `ConversationService`.

pub mod session;

use crate::core::delivery::{Delivery, SubscriptionHandle};
use crate::core::error::ChatError;
use crate::core::traits::ConversationService;
use crate::infrastructure::entities::Message;
use di::Ref;
use log::{debug, warn};
use session::{ChatSession, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Service(#[from] ChatError),
}

/// What one `pump` did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pumped {
    Appended,
    Duplicate,
    /// The subscription lagged; this many messages were recovered by listing.
    CaughtUp(usize),
    /// No live subscription. Call `reconnect` or poll with `catch_up`.
    Disconnected,
}

pub struct ChatClient {
    service: Ref<dyn ConversationService>,
    session: ChatSession,
    subscription: Option<SubscriptionHandle>,
}

impl ChatClient {
    pub fn new(
        service: Ref<dyn ConversationService>,
        principal_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        ChatClient {
            service,
            session: ChatSession::new(principal_id, conversation_id),
            subscription: None,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ChatSession {
        &mut self.session
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }

    /// Enters the view: subscribes, then loads the full history. Subscribing
    /// first means nothing appended during the history fetch is missed; the
    /// overlap is de-duplicated by id.
    pub async fn open(&mut self) -> Result<(), ClientError> {
        self.session.enter()?;
        let principal_id = self.session.principal_id().to_owned();
        let conversation_id = self.session.conversation_id().to_owned();

        match self.service.subscribe(&principal_id, &conversation_id).await {
            Ok(handle) => self.subscription = Some(handle),
            Err(e) if e.is_transient() => {
                warn!("subscribe to {conversation_id} failed, polling instead: {e}");
                self.session.mark_reconnecting();
            }
            Err(e) => {
                self.session.fail()?;
                return Err(e.into());
            }
        }

        match self
            .service
            .list_messages(&principal_id, &conversation_id, None)
            .await
        {
            Ok(history) => {
                self.session.history_loaded(history)?;
            }
            Err(e) => {
                self.release().await;
                self.session.fail()?;
                return Err(e.into());
            }
        }

        self.drain().await?;
        Ok(())
    }

    /// Sends with an optimistic entry. On failure the entry is removed, the
    /// text is put back into the compose input and the error is returned; the
    /// send is not retried.
    pub async fn send(&mut self, body: &str) -> Result<Message, ClientError> {
        let pending = self.session.begin_send(body)?;
        let principal_id = self.session.principal_id().to_owned();
        let conversation_id = self.session.conversation_id().to_owned();

        match self
            .service
            .append(
                &principal_id,
                &conversation_id,
                &pending.body,
                Some(pending.client_ref),
            )
            .await
        {
            Ok(message) => {
                self.session
                    .confirm_send(pending.client_ref, message.clone())?;
                Ok(message)
            }
            Err(e) => {
                self.session.fail_send(pending.client_ref)?;
                Err(e.into())
            }
        }
    }

    /// Waits for the next push and applies it.
    pub async fn pump(&mut self) -> Result<Pumped, ClientError> {
        let Some(handle) = self.subscription.as_mut() else {
            return Ok(Pumped::Disconnected);
        };

        let delivery = handle.recv().await;
        self.apply(delivery).await
    }

    /// Applies every push already buffered without waiting. Returns how many
    /// entries were added.
    pub async fn drain(&mut self) -> Result<usize, ClientError> {
        let mut added = 0;
        loop {
            let Some(delivery) = self.subscription.as_mut().and_then(|h| h.try_recv()) else {
                return Ok(added);
            };
            match self.apply(delivery).await? {
                Pumped::Appended => added += 1,
                Pumped::CaughtUp(n) => added += n,
                Pumped::Duplicate => {}
                Pumped::Disconnected => return Ok(added),
            }
        }
    }

    /// Fetches everything after the session's resume point and merges it.
    /// This is both the lag recovery and the polling fallback.
    pub async fn catch_up(&mut self) -> Result<usize, ClientError> {
        let since_id = self.session.resume_id();
        let messages = self
            .service
            .list_messages(
                self.session.principal_id(),
                self.session.conversation_id(),
                since_id,
            )
            .await?;

        let added = self.session.reconcile(messages)?;
        debug!(
            "caught up {} after {since_id:?}: {added} new",
            self.session.conversation_id()
        );
        Ok(added)
    }

    /// The transport dropped. The subscription is gone on the server side too.
    pub fn connection_lost(&mut self) {
        self.subscription = None;
        self.session.mark_reconnecting();
    }

    /// Re-subscribes and reconciles. Returns how many missed messages were
    /// recovered.
    pub async fn reconnect(&mut self) -> Result<usize, ClientError> {
        if self.session.state() == session::SessionState::Closed {
            return Err(SessionError::Closed.into());
        }
        self.release().await;

        let handle = self
            .service
            .subscribe(self.session.principal_id(), self.session.conversation_id())
            .await?;
        self.subscription = Some(handle);

        let recovered = self.catch_up().await?;
        self.session.mark_live();
        self.drain().await?;
        Ok(recovered)
    }

    /// Leaves the view. Idempotent.
    pub async fn close(&mut self) {
        self.release().await;
        self.session.close();
    }

    async fn apply(&mut self, delivery: Delivery) -> Result<Pumped, ClientError> {
        match delivery {
            Delivery::Message(message) => {
                if self.session.receive(message)? {
                    Ok(Pumped::Appended)
                } else {
                    Ok(Pumped::Duplicate)
                }
            }
            Delivery::Lagged(missed) => {
                warn!(
                    "subscription on {} lagged by {missed}, reconciling",
                    self.session.conversation_id()
                );
                Ok(Pumped::CaughtUp(self.catch_up().await?))
            }
            Delivery::Closed => {
                self.connection_lost();
                Ok(Pumped::Disconnected)
            }
        }
    }

    async fn release(&mut self) {
        if let Some(mut handle) = self.subscription.take() {
            self.service.unsubscribe(&mut handle).await;
        }
    }
}
