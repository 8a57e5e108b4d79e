//! Conversation service tests
//!
//! Drives the registry, message store and delivery hub together against an
//! in-memory database.

use chrono::Utc;
use di::Ref;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use storefront_chat::core::delivery::{Delivery, DeliveryHub};
use storefront_chat::core::error::ChatError;
use storefront_chat::core::services::{ContractConversationRegistry, MyConversationService};
use storefront_chat::core::traits::{ConversationRegistry, ConversationService};
use storefront_chat::infrastructure::database::DatabaseConnection;
use storefront_chat::infrastructure::repositories::{
    DbContractRepository, DbMessageRepository, DbProfileRepository,
};
use storefront_chat::infrastructure::traits::{
    ContractRepository, MessageRepository, ProfileRepository,
};

struct Fixture {
    registry: Ref<dyn ConversationRegistry>,
    service: Ref<dyn ConversationService>,
    hub: Ref<DeliveryHub>,
}

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// Buyer `U1` owns `K-100`, buyer `U2` owns `K-200`, `A1` and `A2` are advisors,
/// `X1` is an unrelated buyer.
async fn seed(pool: &SqlitePool) {
    for (id, name, role) in [
        ("U1", "Ana Buyer", 1),
        ("U2", "Bruno Buyer", 1),
        ("X1", "Xavier", 1),
        ("A1", "Asesor Uno", 2),
        ("A2", "Asesor Dos", 2),
    ] {
        sqlx::query("INSERT INTO profiles (id, full_name, role) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(role)
            .execute(pool)
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO plans (id, name, price, created_at) VALUES (?, ?, ?, ?)")
        .bind("plan-5g")
        .bind("Plan 5G Ilimitado")
        .bind(29.9)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    for (id, buyer) in [("K-100", "U1"), ("K-200", "U2")] {
        sqlx::query(
            "INSERT INTO contracts (id, plan_id, user_id, status, contracted_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind("plan-5g")
        .bind(buyer)
        .bind(1)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }
}

async fn fixture() -> Fixture {
    fixture_with_capacity(64).await
}

async fn fixture_with_capacity(capacity: usize) -> Fixture {
    let pool = setup_test_db().await;
    seed(&pool).await;

    let connection = Ref::new(DatabaseConnection::from_pool(pool));
    let contracts: Ref<dyn ContractRepository> =
        Ref::new(DbContractRepository::new(connection.clone()));
    let profiles: Ref<dyn ProfileRepository> =
        Ref::new(DbProfileRepository::new(connection.clone()));
    let messages: Ref<dyn MessageRepository> = Ref::new(DbMessageRepository::new(connection));
    let hub = Ref::new(DeliveryHub::with_capacity(capacity));

    let registry: Ref<dyn ConversationRegistry> =
        Ref::new(ContractConversationRegistry::new(contracts, profiles));
    let service: Ref<dyn ConversationService> = Ref::new(MyConversationService::new(
        registry.clone(),
        messages,
        hub.clone(),
    ));

    Fixture {
        registry,
        service,
        hub,
    }
}

#[tokio::test]
async fn test_resolve_conversation_is_idempotent() {
    let f = fixture().await;

    let first = f.registry.resolve_conversation("K-100").await.unwrap();
    let second = f.registry.resolve_conversation("K-100").await.unwrap();

    assert_eq!(first.id, "K-100");
    assert_eq!(first.id, second.id);
    assert_eq!(first.buyer_id, "U1");
    assert_eq!(first.buyer_name.as_deref(), Some("Ana Buyer"));
}

#[tokio::test]
async fn test_resolve_unknown_contract() {
    let f = fixture().await;

    let result = f.registry.resolve_conversation("K-999").await;

    assert!(matches!(result, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_resolve_malformed_id() {
    let f = fixture().await;

    let result = f.registry.resolve_conversation("K 100; DROP").await;

    assert!(matches!(result, Err(ChatError::Validation(_))));
}

#[tokio::test]
async fn test_participants_are_buyer_and_any_advisor() {
    let f = fixture().await;

    assert!(f.registry.is_participant("K-100", "U1").await.unwrap());
    assert!(f.registry.is_participant("K-100", "A1").await.unwrap());
    assert!(f.registry.is_participant("K-100", "A2").await.unwrap());
    assert!(!f.registry.is_participant("K-100", "U2").await.unwrap());
    assert!(!f.registry.is_participant("K-100", "X1").await.unwrap());
    // no profile at all
    assert!(!f.registry.is_participant("K-100", "ghost").await.unwrap());
}

#[tokio::test]
async fn test_conversation_lists_follow_role() {
    let f = fixture().await;

    let buyer = f.registry.list_conversations("U1").await.unwrap();
    let advisor = f.registry.list_conversations("A1").await.unwrap();
    let stranger = f.registry.list_conversations("X1").await.unwrap();

    assert_eq!(buyer.len(), 1);
    assert_eq!(buyer[0].id, "K-100");
    assert_eq!(advisor.len(), 2);
    assert!(stranger.is_empty());
}

#[tokio::test]
async fn test_append_assigns_id_and_timestamp() {
    let f = fixture().await;
    let before = Utc::now() - chrono::Duration::seconds(5);

    let message = f.service.append("U1", "K-100", "Hola", None).await.unwrap();

    assert!(message.id > 0);
    assert_eq!(message.conversation_id, "K-100");
    assert_eq!(message.sender_id, "U1");
    assert_eq!(message.sender_name.as_deref(), Some("Ana Buyer"));
    assert_eq!(message.body, "Hola");
    assert!(message.created_at >= before);
}

#[tokio::test]
async fn test_append_rejects_blank_body() {
    let f = fixture().await;

    for body in ["", "   ", "\n\t"] {
        let result = f.service.append("U1", "K-100", body, None).await;
        assert!(
            matches!(result, Err(ChatError::Validation(_))),
            "{body:?} should be rejected"
        );
    }

    let stored = f.service.list_messages("U1", "K-100", None).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_append_accepts_any_non_empty_text() {
    let f = fixture().await;

    for body in [".", "¿En qué puedo ayudarte?", "👍", "  padded  "] {
        let message = f.service.append("A1", "K-100", body, None).await.unwrap();
        assert_eq!(message.body, body);
    }
}

#[tokio::test]
async fn test_non_participant_is_denied_everywhere() {
    let f = fixture().await;

    let append = f.service.append("X1", "K-100", "hi", None).await;
    let list = f.service.list_messages("X1", "K-100", None).await;
    let subscribe = f.service.subscribe("X1", "K-100").await;

    assert!(matches!(append, Err(ChatError::Authorization(_))));
    assert!(matches!(list, Err(ChatError::Authorization(_))));
    assert!(matches!(subscribe, Err(ChatError::Authorization(_))));
}

#[tokio::test]
async fn test_other_buyer_is_denied() {
    let f = fixture().await;

    let result = f.service.list_messages("U2", "K-100", None).await;

    assert!(matches!(result, Err(ChatError::Authorization(_))));
}

#[tokio::test]
async fn test_list_unknown_conversation() {
    let f = fixture().await;

    let result = f.service.list_messages("A1", "K-404", None).await;

    assert!(matches!(result, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_list_is_ordered_and_scoped_to_conversation() {
    let f = fixture().await;

    f.service.append("U1", "K-100", "first", None).await.unwrap();
    f.service.append("U2", "K-200", "elsewhere", None).await.unwrap();
    f.service.append("A1", "K-100", "second", None).await.unwrap();
    f.service.append("U1", "K-100", "third", None).await.unwrap();

    let messages = f.service.list_messages("U1", "K-100", None).await.unwrap();
    let bodies: Vec<&str> = messages.iter().map(|m| m.body.as_str()).collect();

    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn test_since_id_returns_exactly_the_missed_messages() {
    let f = fixture().await;

    let mut ids = Vec::new();
    for i in 1..=8 {
        let message = f
            .service
            .append("U1", "K-100", &format!("message {i}"), None)
            .await
            .unwrap();
        ids.push(message.id);
    }

    let missed = f
        .service
        .list_messages("U1", "K-100", Some(ids[4]))
        .await
        .unwrap();

    let missed_ids: Vec<i64> = missed.iter().map(|m| m.id).collect();
    assert_eq!(missed_ids, ids[5..].to_vec());
}

#[tokio::test]
async fn test_since_id_must_not_be_negative() {
    let f = fixture().await;

    let result = f.service.list_messages("U1", "K-100", Some(-1)).await;

    assert!(matches!(result, Err(ChatError::Validation(_))));
}

#[tokio::test]
async fn test_push_reaches_every_subscriber_with_full_record() {
    let f = fixture().await;
    let mut buyer = f.service.subscribe("U1", "K-100").await.unwrap();
    let mut advisor = f.service.subscribe("A1", "K-100").await.unwrap();
    let mut other = f.service.subscribe("U2", "K-200").await.unwrap();

    let sent = f
        .service
        .append("A1", "K-100", "¿En qué puedo ayudarte?", None)
        .await
        .unwrap();

    assert_eq!(buyer.try_recv(), Some(Delivery::Message(sent.clone())));
    assert_eq!(advisor.try_recv(), Some(Delivery::Message(sent)));
    assert_eq!(other.try_recv(), None);
}

#[tokio::test]
async fn test_advisor_message_scenario() {
    let f = fixture().await;
    let mut buyer = f.service.subscribe("U1", "K-100").await.unwrap();
    let mut advisor = f.service.subscribe("A1", "K-100").await.unwrap();

    f.service
        .append("A1", "K-100", "¿En qué puedo ayudarte?", None)
        .await
        .unwrap();

    let Delivery::Message(pushed) = buyer.recv().await else {
        panic!("expected a pushed message");
    };
    assert_eq!(pushed.sender_id, "A1");
    assert!(matches!(advisor.try_recv(), Some(Delivery::Message(_))));

    let history = f.service.list_messages("U1", "K-100", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender_id, "A1");
    assert_eq!(history[0].body, "¿En qué puedo ayudarte?");
    assert_eq!(history[0], pushed);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_releases_channel() {
    let f = fixture().await;
    let mut handle = f.service.subscribe("U1", "K-100").await.unwrap();
    assert_eq!(f.hub.subscriber_count("K-100").await, 1);

    f.service.unsubscribe(&mut handle).await;
    f.service.unsubscribe(&mut handle).await;

    assert!(handle.is_closed());
    assert_eq!(handle.recv().await, Delivery::Closed);
    assert_eq!(f.hub.subscriber_count("K-100").await, 0);

    // appending with nobody listening still stores the message
    f.service.append("U1", "K-100", "anyone?", None).await.unwrap();
    assert_eq!(
        f.service.list_messages("U1", "K-100", None).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_dropped_subscription_misses_pushes_until_reconciled() {
    let f = fixture().await;
    let mut handle = f.service.subscribe("U1", "K-100").await.unwrap();

    let mut last_seen = 0;
    for i in 1..=5 {
        f.service
            .append("A1", "K-100", &format!("m{i}"), None)
            .await
            .unwrap();
        if let Some(Delivery::Message(m)) = handle.try_recv() {
            last_seen = m.id;
        }
    }

    // transport drop
    drop(handle);
    for i in 6..=8 {
        f.service
            .append("A1", "K-100", &format!("m{i}"), None)
            .await
            .unwrap();
    }

    let mut handle = f.service.subscribe("U1", "K-100").await.unwrap();
    assert_eq!(handle.try_recv(), None);

    let missed = f
        .service
        .list_messages("U1", "K-100", Some(last_seen))
        .await
        .unwrap();
    let bodies: Vec<&str> = missed.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["m6", "m7", "m8"]);
}

#[tokio::test]
async fn test_slow_subscriber_is_told_it_lagged() {
    let f = fixture_with_capacity(2).await;
    let mut handle = f.service.subscribe("U1", "K-100").await.unwrap();

    for i in 1..=5 {
        f.service
            .append("A1", "K-100", &format!("m{i}"), None)
            .await
            .unwrap();
    }

    assert_eq!(handle.try_recv(), Some(Delivery::Lagged(3)));
    let Some(Delivery::Message(next)) = handle.try_recv() else {
        panic!("expected the buffered tail");
    };
    assert_eq!(next.body, "m4");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_keep_total_order() {
    let f = fixture_with_capacity(128).await;
    let mut watcher = f.service.subscribe("A2", "K-100").await.unwrap();

    let mut tasks = Vec::new();
    for sender in ["U1", "A1"] {
        let service = f.service.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                service
                    .append(sender, "K-100", &format!("{sender}-{i}"), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stored = f.service.list_messages("A2", "K-100", None).await.unwrap();
    assert_eq!(stored.len(), 20);
    assert!(stored.windows(2).all(|w| w[0].id < w[1].id));

    // each sender's own messages keep their send order
    for sender in ["U1", "A1"] {
        let own: Vec<String> = stored
            .iter()
            .filter(|m| m.sender_id == sender)
            .map(|m| m.body.clone())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("{sender}-{i}")).collect();
        assert_eq!(own, expected);
    }

    // pushes arrive in the same order as the store lists them
    let mut pushed = Vec::new();
    while let Some(Delivery::Message(m)) = watcher.try_recv() {
        pushed.push(m.id);
    }
    let stored_ids: Vec<i64> = stored.iter().map(|m| m.id).collect();
    assert_eq!(pushed, stored_ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_locks_are_released_after_appends() {
    let f = fixture().await;

    let mut tasks = Vec::new();
    for (sender, conversation) in [("U1", "K-100"), ("A1", "K-100"), ("U2", "K-200")] {
        let service = f.service.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..5 {
                service
                    .append(sender, conversation, &format!("{sender}-{i}"), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(f.hub.pending_writers(), 0);

    // a rejected append takes no turn at all
    let _ = f.service.append("X1", "K-100", "hola", None).await;
    assert_eq!(f.hub.pending_writers(), 0);
}

#[tokio::test]
async fn test_abandoned_channels_are_pruned() {
    let f = fixture().await;

    let first = f.service.subscribe("U1", "K-100").await.unwrap();
    let second = f.service.subscribe("U2", "K-200").await.unwrap();
    assert_eq!(f.hub.open_channels().await, 2);

    // dropped without unsubscribing
    drop(first);
    drop(second);

    let mut third = f.service.subscribe("U1", "K-100").await.unwrap();
    assert_eq!(f.hub.open_channels().await, 1);

    f.service.unsubscribe(&mut third).await;
    assert_eq!(f.hub.open_channels().await, 0);

    let fourth = f.service.subscribe("U2", "K-200").await.unwrap();
    drop(fourth);
    assert_eq!(f.hub.subscriber_count("K-200").await, 0);
    assert_eq!(f.hub.open_channels().await, 0);
}
