//! Conversations endpoints

use crate::api::ExtractUser;
use crate::api::conversations::schemas::{ConversationList, CreateMessage, MessagesList, SinceQuery};
use crate::core::delivery::Delivery;
use crate::core::error::ChatError;
use crate::core::traits::{ConversationRegistry, ConversationService};
use crate::infrastructure::entities;
use async_stream::stream;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::Stream;
use log::{debug, warn};
use std::convert::Infallible;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations))
        .route("/:id", get(get_conversation))
        .route(
            "/:id/messages",
            get(conversation_messages).post(post_message),
        )
        .route("/:id/events", get(conversation_events))
}

async fn list_conversations(
    Inject(registry): Inject<dyn ConversationRegistry>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<ConversationList>, ChatError> {
    let conversations = registry.list_conversations(&current_user).await?;

    Ok(Json(ConversationList {
        conversations: conversations
            .into_iter()
            .map(schemas::Conversation::from)
            .collect(),
    }))
}

async fn get_conversation(
    Inject(registry): Inject<dyn ConversationRegistry>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<schemas::Conversation>, ChatError> {
    let conversation = registry.authorize(&conversation_id, &current_user).await?;

    Ok(Json(conversation.into()))
}

async fn conversation_messages(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<MessagesList>, ChatError> {
    let messages = conversation_service
        .list_messages(&current_user, &conversation_id, query.since_id)
        .await?;

    Ok(Json(MessagesList {
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

async fn post_message(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<String>,
    Json(message): Json<CreateMessage>,
) -> Result<(StatusCode, Json<schemas::Message>), ChatError> {
    let message = conversation_service
        .append(
            &current_user,
            &conversation_id,
            &message.body,
            message.client_ref,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message.into())))
}

/// Live feed of a conversation. Replays everything after `since_id` first, then
/// streams pushes. The subscription is opened before the replay is read, and
/// live messages already replayed are skipped.
async fn conversation_events(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractUser(current_user): ExtractUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatError> {
    let mut handle = conversation_service
        .subscribe(&current_user, &conversation_id)
        .await?;
    let backlog = conversation_service
        .list_messages(&current_user, &conversation_id, query.since_id)
        .await?;

    let stream = stream! {
        let mut last_sent = query.since_id.unwrap_or(0);

        for message in backlog {
            last_sent = last_sent.max(message.id);
            yield Ok(message_event(message));
        }

        loop {
            match handle.recv().await {
                Delivery::Message(message) if message.id > last_sent => {
                    last_sent = message.id;
                    yield Ok(message_event(message));
                }
                Delivery::Message(_) => {}
                Delivery::Lagged(missed) => {
                    warn!("subscription {} lagged by {missed}", handle.id());
                    yield Ok(json_event("resync", &schemas::Resync { since_id: last_sent }));
                }
                Delivery::Closed => break,
            }
        }

        debug!("event stream for subscription {} ended", handle.id());
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn message_event(message: entities::Message) -> Event {
    let id = message.id.to_string();
    json_event("message", &schemas::Message::from(message)).id(id)
}

fn json_event<T: serde::Serialize>(name: &'static str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use crate::infrastructure::entities::ContractStatus;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug, Default)]
    pub struct SinceQuery {
        pub since_id: Option<i64>,
    }

    #[derive(Serialize, Debug)]
    pub struct Conversation {
        pub id: String,
        pub buyer_id: String,
        pub buyer_name: Option<String>,
        pub plan_id: String,
        pub plan_name: String,
        pub status: ContractStatus,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Conversation> for Conversation {
        fn from(conversation: entities::Conversation) -> Self {
            Conversation {
                id: conversation.id,
                buyer_id: conversation.buyer_id,
                buyer_name: conversation.buyer_name,
                plan_id: conversation.plan_id,
                plan_name: conversation.plan_name,
                status: conversation.status,
                created_at: conversation.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationList {
        pub conversations: Vec<Conversation>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    /// Full message record, also used as the push payload.
    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Message {
        pub id: i64,
        pub conversation_id: String,
        pub sender_id: String,
        pub sender_name: Option<String>,
        pub body: String,
        pub client_ref: Option<Uuid>,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                id: message.id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                sender_name: message.sender_name,
                body: message.body,
                client_ref: message.client_ref,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub body: String,
        #[serde(default)]
        pub client_ref: Option<Uuid>,
    }

    #[derive(Serialize, Debug)]
    pub struct Resync {
        pub since_id: i64,
    }
}
