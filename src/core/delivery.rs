//! In-process delivery channel.
//!
//! One `broadcast` channel per conversation with at least one open
//! subscription. Appends to a conversation take a writer turn first, so the
//! insert and the push happen in id order for every subscriber.
//!
//! Publishing is fire-and-forget: a subscriber that is not connected, or that
//! lags behind the channel buffer, does not get the message redelivered and
//! must catch up through `list_messages(since_id)`.

use crate::config::Settings;
use crate::infrastructure::entities::Message;
use di::inject;
use di::injectable;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use uuid::Uuid;

type WriterMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

pub struct DeliveryHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Message>>>,
    writers: WriterMap,
    capacity: usize,
}

#[injectable]
impl DeliveryHub {
    #[inject]
    pub fn create() -> DeliveryHub {
        DeliveryHub::with_capacity(Settings::from_env().channel_capacity)
    }
}

impl DeliveryHub {
    pub fn with_capacity(capacity: usize) -> DeliveryHub {
        DeliveryHub {
            channels: Mutex::new(HashMap::new()),
            writers: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Waits until no other append to the conversation is between its insert
    /// and its push. Hold the turn across both.
    pub async fn writer_turn(&self, conversation_id: &str) -> WriterTurn {
        let writer = {
            let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
            writers
                .entry(conversation_id.to_owned())
                .or_default()
                .clone()
        };

        WriterTurn {
            guard: Some(writer.lock_owned().await),
            conversation_id: conversation_id.to_owned(),
            writers: self.writers.clone(),
        }
    }

    /// Conversations with an append in progress or waiting for its turn.
    pub fn pending_writers(&self) -> usize {
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Conversations that currently have a channel.
    pub async fn open_channels(&self) -> usize {
        self.channels.lock().await.len()
    }

    /// Opens a subscription. Authorization is the caller's job.
    pub async fn open(&self, conversation_id: &str, principal_id: &str) -> SubscriptionHandle {
        let mut channels = self.channels.lock().await;
        // handles dropped without release leave channels nobody listens to
        channels.retain(|_, sender| sender.receiver_count() > 0);
        let receiver = channels
            .entry(conversation_id.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_owned(),
            principal_id: principal_id.to_owned(),
            receiver: Some(receiver),
        };
        debug!(
            "subscription {} opened on {} by {}",
            handle.id, handle.conversation_id, handle.principal_id
        );
        handle
    }

    /// Pushes a stored message to every open subscription of its conversation.
    /// Returns how many subscriptions it reached.
    pub async fn publish(&self, message: &Message) -> usize {
        let mut channels = self.channels.lock().await;
        let Some(sender) = channels.get(&message.conversation_id) else {
            return 0;
        };

        match sender.send(message.clone()) {
            Ok(reached) => reached,
            Err(_) => {
                // every receiver was dropped without an explicit unsubscribe
                channels.remove(&message.conversation_id);
                0
            }
        }
    }

    /// Closes the handle. Calling it again on a closed handle does nothing.
    pub async fn release(&self, handle: &mut SubscriptionHandle) {
        if !handle.close() {
            return;
        }

        let mut channels = self.channels.lock().await;
        if let Some(sender) = channels.get(&handle.conversation_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&handle.conversation_id);
            }
        }
        debug!("subscription {} closed", handle.id);
    }

    pub async fn subscriber_count(&self, conversation_id: &str) -> usize {
        let mut channels = self.channels.lock().await;
        let count = channels
            .get(conversation_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0);
        if count == 0 {
            channels.remove(conversation_id);
        }
        count
    }
}

/// Exclusive right to append to one conversation. The last turn to finish
/// removes the conversation's lock from the hub.
pub struct WriterTurn {
    guard: Option<OwnedMutexGuard<()>>,
    conversation_id: String,
    writers: WriterMap,
}

impl Drop for WriterTurn {
    fn drop(&mut self) {
        // the guard holds a reference to the lock itself
        drop(self.guard.take());

        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        if writers
            .get(&self.conversation_id)
            .is_some_and(|writer| Arc::strong_count(writer) == 1)
        {
            writers.remove(&self.conversation_id);
        }
    }
}

/// What a subscription yields next.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(Message),
    /// The subscriber fell behind and this many pushes were dropped for it.
    Lagged(u64),
    Closed,
}

/// A live subscription owned by one client session. Dropping it releases the
/// underlying receiver, which counts as an implicit unsubscribe.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Uuid,
    conversation_id: String,
    principal_id: String,
    receiver: Option<broadcast::Receiver<Message>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Waits for the next push.
    pub async fn recv(&mut self) -> Delivery {
        let Some(receiver) = self.receiver.as_mut() else {
            return Delivery::Closed;
        };

        match receiver.recv().await {
            Ok(message) => Delivery::Message(message),
            Err(RecvError::Lagged(missed)) => Delivery::Lagged(missed),
            Err(RecvError::Closed) => {
                self.receiver = None;
                Delivery::Closed
            }
        }
    }

    /// Returns the next push if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        let receiver = self.receiver.as_mut()?;

        match receiver.try_recv() {
            Ok(message) => Some(Delivery::Message(message)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Lagged(missed)) => Some(Delivery::Lagged(missed)),
            Err(TryRecvError::Closed) => {
                self.receiver = None;
                Some(Delivery::Closed)
            }
        }
    }

    /// Drops the receiver. Returns `false` if it was already closed.
    fn close(&mut self) -> bool {
        self.receiver.take().is_some()
    }
}
