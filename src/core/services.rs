//! Implementations for the service the app needs.
//!

use crate::core::delivery::{DeliveryHub, SubscriptionHandle};
use crate::core::error::{ChatError, ChatResult, validate_body, validate_id};
use crate::core::traits::{
    ContractService, ConversationRegistry, ConversationService, PlanService, ProfileService,
};
use crate::infrastructure::entities::{
    Contract, ContractStatus, Conversation, Message, Plan, PlanDraft, Profile, Role,
};
use crate::infrastructure::traits::{
    ContractRepository, MessageRepository, PlanRepository, ProfileRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use log::{debug, info};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 120;
const MAX_PHONE_LEN: usize = 32;

async fn role_of(profiles: &dyn ProfileRepository, principal_id: &str) -> ChatResult<Option<Role>> {
    Ok(profiles
        .find_profile(principal_id)
        .await?
        .map(|profile| profile.role))
}

#[injectable(ConversationRegistry)]
pub struct ContractConversationRegistry {
    contracts: Ref<dyn ContractRepository>,
    profiles: Ref<dyn ProfileRepository>,
}

impl ContractConversationRegistry {
    pub fn new(contracts: Ref<dyn ContractRepository>, profiles: Ref<dyn ProfileRepository>) -> Self {
        Self { contracts, profiles }
    }

    async fn participates(&self, conversation: &Conversation, principal_id: &str) -> ChatResult<bool> {
        if conversation.buyer_id == principal_id {
            return Ok(true);
        }
        Ok(role_of(&*self.profiles, principal_id).await? == Some(Role::Advisor))
    }
}

#[async_trait]
impl ConversationRegistry for ContractConversationRegistry {
    async fn resolve_conversation(&self, contract_id: &str) -> ChatResult<Conversation> {
        validate_id("conversation id", contract_id)?;

        self.contracts
            .find_conversation(contract_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("no contract `{contract_id}`")))
    }

    async fn is_participant(&self, conversation_id: &str, principal_id: &str) -> ChatResult<bool> {
        let conversation = self.resolve_conversation(conversation_id).await?;
        self.participates(&conversation, principal_id).await
    }

    async fn authorize(&self, conversation_id: &str, principal_id: &str) -> ChatResult<Conversation> {
        validate_id("principal id", principal_id)?;
        let conversation = self.resolve_conversation(conversation_id).await?;

        if self.participates(&conversation, principal_id).await? {
            Ok(conversation)
        } else {
            Err(ChatError::Authorization(format!(
                "`{principal_id}` is not a participant of `{conversation_id}`"
            )))
        }
    }

    async fn list_conversations(&self, principal_id: &str) -> ChatResult<Vec<Conversation>> {
        validate_id("principal id", principal_id)?;

        match role_of(&*self.profiles, principal_id).await? {
            Some(Role::Advisor) => self.contracts.list_conversations(None).await,
            _ => self.contracts.list_conversations(Some(principal_id)).await,
        }
    }
}

#[injectable(ConversationService)]
pub struct MyConversationService {
    registry: Ref<dyn ConversationRegistry>,
    messages: Ref<dyn MessageRepository>,
    hub: Ref<DeliveryHub>,
}

impl MyConversationService {
    pub fn new(
        registry: Ref<dyn ConversationRegistry>,
        messages: Ref<dyn MessageRepository>,
        hub: Ref<DeliveryHub>,
    ) -> Self {
        Self {
            registry,
            messages,
            hub,
        }
    }
}

#[async_trait]
impl ConversationService for MyConversationService {
    async fn list_messages(
        &self,
        principal_id: &str,
        conversation_id: &str,
        since_id: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        if since_id.is_some_and(|id| id < 0) {
            return Err(ChatError::Validation("since_id must not be negative".to_owned()));
        }
        self.registry.authorize(conversation_id, principal_id).await?;

        self.messages.list_messages(conversation_id, since_id).await
    }

    async fn append(
        &self,
        principal_id: &str,
        conversation_id: &str,
        body: &str,
        client_ref: Option<Uuid>,
    ) -> ChatResult<Message> {
        self.registry.authorize(conversation_id, principal_id).await?;
        validate_body(body)?;

        let _turn = self.hub.writer_turn(conversation_id).await;
        let message = self
            .messages
            .insert_message(conversation_id, principal_id, body, client_ref)
            .await?;

        // the insert is committed at this point; fan-out is best effort
        let reached = self.hub.publish(&message).await;
        debug!(
            "message {} in {} pushed to {reached} subscriptions",
            message.id, message.conversation_id
        );

        Ok(message)
    }

    async fn subscribe(
        &self,
        principal_id: &str,
        conversation_id: &str,
    ) -> ChatResult<SubscriptionHandle> {
        self.registry.authorize(conversation_id, principal_id).await?;

        Ok(self.hub.open(conversation_id, principal_id).await)
    }

    async fn unsubscribe(&self, handle: &mut SubscriptionHandle) {
        self.hub.release(handle).await;
    }
}

#[injectable(ContractService)]
pub struct MyContractService {
    contracts: Ref<dyn ContractRepository>,
    profiles: Ref<dyn ProfileRepository>,
    plans: Ref<dyn PlanRepository>,
}

impl MyContractService {
    pub fn new(
        contracts: Ref<dyn ContractRepository>,
        profiles: Ref<dyn ProfileRepository>,
        plans: Ref<dyn PlanRepository>,
    ) -> Self {
        Self {
            contracts,
            profiles,
            plans,
        }
    }
}

#[async_trait]
impl ContractService for MyContractService {
    async fn create_contract(&self, principal_id: &str, plan_id: &str) -> ChatResult<Contract> {
        validate_id("principal id", principal_id)?;
        validate_id("plan id", plan_id)?;

        if role_of(&*self.profiles, principal_id).await? == Some(Role::Advisor) {
            return Err(ChatError::Authorization(
                "advisors cannot contract plans".to_owned(),
            ));
        }

        if !self
            .plans
            .find_plan(plan_id)
            .await?
            .is_some_and(|plan| plan.is_active)
        {
            return Err(ChatError::NotFound(format!("no active plan `{plan_id}`")));
        }

        let contract_id = Uuid::new_v4().to_string();
        let contract = self
            .contracts
            .create_contract(&contract_id, plan_id, principal_id, Utc::now())
            .await?;

        info!("contract {} created by {principal_id}", contract.id);
        Ok(contract)
    }

    async fn list_contracts(&self, principal_id: &str) -> ChatResult<Vec<Contract>> {
        validate_id("principal id", principal_id)?;

        match role_of(&*self.profiles, principal_id).await? {
            Some(Role::Advisor) => self.contracts.list_contracts(None).await,
            _ => self.contracts.list_contracts(Some(principal_id)).await,
        }
    }

    async fn update_status(
        &self,
        principal_id: &str,
        contract_id: &str,
        status: ContractStatus,
    ) -> ChatResult<Contract> {
        validate_id("principal id", principal_id)?;
        validate_id("contract id", contract_id)?;

        if role_of(&*self.profiles, principal_id).await? != Some(Role::Advisor) {
            return Err(ChatError::Authorization(
                "only advisors can decide contracts".to_owned(),
            ));
        }
        if status == ContractStatus::Pending {
            return Err(ChatError::Validation(
                "a contract can only be approved or rejected".to_owned(),
            ));
        }
        if self.contracts.find_contract(contract_id).await?.is_none() {
            return Err(ChatError::NotFound(format!("no contract `{contract_id}`")));
        }

        let contract = self
            .contracts
            .decide_contract(contract_id, status)
            .await?
            .ok_or_else(|| {
                ChatError::Validation(format!("contract `{contract_id}` was already decided"))
            })?;

        info!("contract {contract_id} set to {status:?} by {principal_id}");
        Ok(contract)
    }
}

#[injectable(ProfileService)]
pub struct MyProfileService {
    profiles: Ref<dyn ProfileRepository>,
}

impl MyProfileService {
    pub fn new(profiles: Ref<dyn ProfileRepository>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl ProfileService for MyProfileService {
    async fn get_profile(&self, principal_id: &str) -> ChatResult<Profile> {
        validate_id("principal id", principal_id)?;

        self.profiles
            .find_profile(principal_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("no profile for `{principal_id}`")))
    }

    async fn update_profile(
        &self,
        principal_id: &str,
        full_name: &str,
        phone: Option<&str>,
    ) -> ChatResult<Profile> {
        validate_id("principal id", principal_id)?;

        let full_name = full_name.trim();
        if full_name.is_empty() || full_name.chars().count() > MAX_NAME_LEN {
            return Err(ChatError::Validation(format!(
                "full name must be 1..={MAX_NAME_LEN} characters"
            )));
        }
        let phone = phone.map(str::trim).filter(|phone| !phone.is_empty());
        if let Some(phone) = phone {
            validate_phone(phone)?;
        }

        self.profiles
            .upsert_profile(principal_id, full_name, phone)
            .await
    }
}

fn validate_phone(phone: &str) -> ChatResult<()> {
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '));
    if !allowed || !phone.chars().any(|c| c.is_ascii_digit()) || phone.len() > MAX_PHONE_LEN {
        return Err(ChatError::Validation(format!(
            "phone must be up to {MAX_PHONE_LEN} digits, spaces or `+-()`"
        )));
    }
    Ok(())
}

/// Trims every text field, blank optionals become `None`.
fn normalize_plan(mut draft: PlanDraft) -> ChatResult<PlanDraft> {
    draft.name = draft.name.trim().to_owned();
    if draft.name.is_empty() || draft.name.chars().count() > MAX_NAME_LEN {
        return Err(ChatError::Validation(format!(
            "plan name must be 1..={MAX_NAME_LEN} characters"
        )));
    }
    if !draft.price.is_finite() || draft.price < 0.0 {
        return Err(ChatError::Validation(
            "price must be a non-negative number".to_owned(),
        ));
    }
    if draft.data_gb.is_some_and(|gb| !gb.is_finite() || gb < 0.0) {
        return Err(ChatError::Validation(
            "data_gb must be a non-negative number".to_owned(),
        ));
    }
    if draft.minutes.is_some_and(|minutes| minutes < 0) {
        return Err(ChatError::Validation("minutes must not be negative".to_owned()));
    }

    for field in [
        &mut draft.segment,
        &mut draft.target_audience,
        &mut draft.social_media_details,
        &mut draft.whatsapp_details,
        &mut draft.image_url,
        &mut draft.promotion_details,
    ] {
        *field = field
            .take()
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
    }
    Ok(draft)
}

#[injectable(PlanService)]
pub struct MyPlanService {
    plans: Ref<dyn PlanRepository>,
    profiles: Ref<dyn ProfileRepository>,
}

impl MyPlanService {
    pub fn new(plans: Ref<dyn PlanRepository>, profiles: Ref<dyn ProfileRepository>) -> Self {
        Self { plans, profiles }
    }

    async fn is_advisor(&self, principal_id: Option<&str>) -> ChatResult<bool> {
        let Some(principal_id) = principal_id else {
            return Ok(false);
        };
        validate_id("principal id", principal_id)?;
        Ok(role_of(&*self.profiles, principal_id).await? == Some(Role::Advisor))
    }

    async fn require_advisor(&self, principal_id: &str) -> ChatResult<()> {
        if self.is_advisor(Some(principal_id)).await? {
            Ok(())
        } else {
            Err(ChatError::Authorization(
                "only advisors can manage plans".to_owned(),
            ))
        }
    }
}

#[async_trait]
impl PlanService for MyPlanService {
    async fn list_plans(&self, principal_id: Option<&str>) -> ChatResult<Vec<Plan>> {
        let advisor = self.is_advisor(principal_id).await?;
        self.plans.list_plans(!advisor).await
    }

    async fn get_plan(&self, principal_id: Option<&str>, plan_id: &str) -> ChatResult<Plan> {
        validate_id("plan id", plan_id)?;

        let not_found = || ChatError::NotFound(format!("no plan `{plan_id}`"));
        let plan = self.plans.find_plan(plan_id).await?.ok_or_else(not_found)?;
        if !plan.is_active && !self.is_advisor(principal_id).await? {
            return Err(not_found());
        }
        Ok(plan)
    }

    async fn create_plan(&self, principal_id: &str, draft: PlanDraft) -> ChatResult<Plan> {
        self.require_advisor(principal_id).await?;
        let draft = normalize_plan(draft)?;

        let plan_id = Uuid::new_v4().to_string();
        let plan = self.plans.create_plan(&plan_id, &draft, Utc::now()).await?;

        info!("plan {} `{}` created by {principal_id}", plan.id, plan.name);
        Ok(plan)
    }

    async fn update_plan(
        &self,
        principal_id: &str,
        plan_id: &str,
        draft: PlanDraft,
    ) -> ChatResult<Plan> {
        self.require_advisor(principal_id).await?;
        validate_id("plan id", plan_id)?;
        let draft = normalize_plan(draft)?;

        let plan = self
            .plans
            .update_plan(plan_id, &draft)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("no plan `{plan_id}`")))?;

        info!("plan {plan_id} updated by {principal_id}");
        Ok(plan)
    }

    async fn delete_plan(&self, principal_id: &str, plan_id: &str) -> ChatResult<()> {
        self.require_advisor(principal_id).await?;
        validate_id("plan id", plan_id)?;

        if self.plans.find_plan(plan_id).await?.is_none() {
            return Err(ChatError::NotFound(format!("no plan `{plan_id}`")));
        }
        if !self.plans.delete_unused_plan(plan_id).await? {
            return Err(ChatError::Validation(format!(
                "plan `{plan_id}` has contracts; deactivate it instead"
            )));
        }

        info!("plan {plan_id} deleted by {principal_id}");
        Ok(())
    }
}
