//! Infrastructure traits, used for DI on higher levels

use crate::core::error::ChatResult;
use crate::infrastructure::entities;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_profile(&self, principal_id: &str) -> ChatResult<Option<entities::Profile>>;

    /// Sets the display name and phone, creating a buyer profile when none
    /// exists. Never touches the role of an existing profile.
    async fn upsert_profile(
        &self,
        principal_id: &str,
        full_name: &str,
        phone: Option<&str>,
    ) -> ChatResult<entities::Profile>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Active plans cheapest first, or every plan newest first.
    async fn list_plans(&self, active_only: bool) -> ChatResult<Vec<entities::Plan>>;

    async fn find_plan(&self, plan_id: &str) -> ChatResult<Option<entities::Plan>>;

    async fn create_plan(
        &self,
        plan_id: &str,
        draft: &entities::PlanDraft,
        created_at: DateTime<Utc>,
    ) -> ChatResult<entities::Plan>;

    async fn update_plan(
        &self,
        plan_id: &str,
        draft: &entities::PlanDraft,
    ) -> ChatResult<Option<entities::Plan>>;

    /// Deletes a plan nobody has contracted. Returns `false` when nothing was
    /// deleted.
    async fn delete_unused_plan(&self, plan_id: &str) -> ChatResult<bool>;
}

#[async_trait]
pub trait ContractRepository: Send + Sync {
    /// Stores a pending contract.
    async fn create_contract(
        &self,
        contract_id: &str,
        plan_id: &str,
        buyer_id: &str,
        contracted_at: DateTime<Utc>,
    ) -> ChatResult<entities::Contract>;

    async fn find_contract(&self, contract_id: &str) -> ChatResult<Option<entities::Contract>>;

    /// Newest first. `None` lists every contract.
    async fn list_contracts(&self, buyer_id: Option<&str>) -> ChatResult<Vec<entities::Contract>>;

    /// Moves a pending contract to `status`. Returns `None` when no pending
    /// contract with that id exists.
    async fn decide_contract(
        &self,
        contract_id: &str,
        status: entities::ContractStatus,
    ) -> ChatResult<Option<entities::Contract>>;

    async fn find_conversation(
        &self,
        contract_id: &str,
    ) -> ChatResult<Option<entities::Conversation>>;

    /// Newest first. `None` lists every conversation.
    async fn list_conversations(
        &self,
        buyer_id: Option<&str>,
    ) -> ChatResult<Vec<entities::Conversation>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Appends a message; the database assigns id and timestamp.
    async fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        client_ref: Option<Uuid>,
    ) -> ChatResult<entities::Message>;

    /// Ascending by `(created_at, id)`, only ids above `since_id` when given.
    async fn list_messages(
        &self,
        conversation_id: &str,
        since_id: Option<i64>,
    ) -> ChatResult<Vec<entities::Message>>;
}
