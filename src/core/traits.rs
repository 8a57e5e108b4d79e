//! DI "Interfaces"
//!
//! Every operation takes the acting principal explicitly; there is no ambient
//! session state in the core.

use crate::core::delivery::SubscriptionHandle;
use crate::core::error::ChatResult;
use crate::infrastructure::entities;
use crate::infrastructure::entities::ContractStatus;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ConversationRegistry: Send + Sync {
    /// Returns the conversation of a contract. The contract id is the
    /// conversation id, so this is stable for the lifetime of the contract.
    ///
    /// Returns `NotFound` if the contract does not exist.
    async fn resolve_conversation(&self, contract_id: &str)
    -> ChatResult<entities::Conversation>;

    /// True if the principal is the buyer of the contract or holds advisor
    /// privilege. Any advisor may join any conversation.
    async fn is_participant(&self, conversation_id: &str, principal_id: &str) -> ChatResult<bool>;

    /// Resolves the conversation and checks participation in one go.
    ///
    /// Returns `NotFound` for an unknown conversation and `Authorization` for a
    /// non-participant.
    async fn authorize(
        &self,
        conversation_id: &str,
        principal_id: &str,
    ) -> ChatResult<entities::Conversation>;

    /// The buyer's own conversations, or all of them for an advisor.
    async fn list_conversations(
        &self,
        principal_id: &str,
    ) -> ChatResult<Vec<entities::Conversation>>;
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Lists messages ascending by `(created_at, id)`. With `since_id`, only
    /// messages with a greater id are returned.
    async fn list_messages(
        &self,
        principal_id: &str,
        conversation_id: &str,
        since_id: Option<i64>,
    ) -> ChatResult<Vec<entities::Message>>;

    /// Stores a message and fans it out to the conversation's subscribers.
    ///
    /// Returns `Validation` for an empty body, `Authorization` if the sender is
    /// not a participant.
    async fn append(
        &self,
        principal_id: &str,
        conversation_id: &str,
        body: &str,
        client_ref: Option<Uuid>,
    ) -> ChatResult<entities::Message>;

    async fn subscribe(
        &self,
        principal_id: &str,
        conversation_id: &str,
    ) -> ChatResult<SubscriptionHandle>;

    /// Idempotent.
    async fn unsubscribe(&self, handle: &mut SubscriptionHandle);
}

#[async_trait]
pub trait ContractService: Send + Sync {
    /// Creates a pending contract for a buyer, which also opens its conversation.
    /// The plan must exist and be active.
    async fn create_contract(
        &self,
        principal_id: &str,
        plan_id: &str,
    ) -> ChatResult<entities::Contract>;

    async fn list_contracts(&self, principal_id: &str) -> ChatResult<Vec<entities::Contract>>;

    /// Approves or rejects a pending contract. Advisors only.
    async fn update_status(
        &self,
        principal_id: &str,
        contract_id: &str,
        status: ContractStatus,
    ) -> ChatResult<entities::Contract>;
}

#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn get_profile(&self, principal_id: &str) -> ChatResult<entities::Profile>;

    /// Replaces name and phone. A missing or blank phone clears it.
    async fn update_profile(
        &self,
        principal_id: &str,
        full_name: &str,
        phone: Option<&str>,
    ) -> ChatResult<entities::Profile>;
}

#[async_trait]
pub trait PlanService: Send + Sync {
    /// Advisors see the whole catalog newest first; anyone else, including
    /// anonymous visitors, sees active plans cheapest first.
    async fn list_plans(&self, principal_id: Option<&str>) -> ChatResult<Vec<entities::Plan>>;

    /// Inactive plans are only visible to advisors.
    async fn get_plan(
        &self,
        principal_id: Option<&str>,
        plan_id: &str,
    ) -> ChatResult<entities::Plan>;

    async fn create_plan(
        &self,
        principal_id: &str,
        draft: entities::PlanDraft,
    ) -> ChatResult<entities::Plan>;

    async fn update_plan(
        &self,
        principal_id: &str,
        plan_id: &str,
        draft: entities::PlanDraft,
    ) -> ChatResult<entities::Plan>;

    /// Plans that have been contracted cannot be deleted; deactivate them
    /// instead.
    async fn delete_plan(&self, principal_id: &str, plan_id: &str) -> ChatResult<()>;
}
