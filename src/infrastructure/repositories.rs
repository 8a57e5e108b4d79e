//! DB Repository abstractions

use crate::core::error::{ChatError, ChatResult, storage};
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    Contract, ContractStatus, Conversation, Message, Plan, PlanDraft, Profile, Role,
};
use crate::infrastructure::traits::{
    ContractRepository, MessageRepository, PlanRepository, ProfileRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use uuid::Uuid;

const SELECT_MESSAGE: &str = "SELECT messages.id, messages.conversation_id, messages.sender_id, profiles.full_name AS sender_name, messages.body, messages.client_ref, messages.created_at FROM messages LEFT JOIN profiles ON profiles.id = messages.sender_id";

const SELECT_CONVERSATION: &str = "SELECT contracts.id, contracts.user_id AS buyer_id, profiles.full_name AS buyer_name, contracts.plan_id, plans.name AS plan_name, contracts.status, contracts.contracted_at AS created_at FROM contracts JOIN plans ON plans.id = contracts.plan_id LEFT JOIN profiles ON profiles.id = contracts.user_id";

const SELECT_CONTRACT: &str = "SELECT contracts.id, contracts.plan_id, plans.name AS plan_name, plans.price AS plan_price, contracts.user_id, profiles.full_name AS user_name, contracts.status, contracts.contracted_at FROM contracts JOIN plans ON plans.id = contracts.plan_id LEFT JOIN profiles ON profiles.id = contracts.user_id";

const NEWEST_CONTRACTS_FIRST: &str = "ORDER BY contracts.contracted_at DESC, contracts.rowid DESC";

#[injectable(ProfileRepository)]
pub struct DbProfileRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbProfileRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ProfileRepository for DbProfileRepository {
    async fn find_profile(&self, principal_id: &str) -> ChatResult<Option<Profile>> {
        sqlx::query_as("SELECT id, full_name, phone, role FROM profiles WHERE id = ?")
            .bind(principal_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(storage)
    }

    async fn upsert_profile(
        &self,
        principal_id: &str,
        full_name: &str,
        phone: Option<&str>,
    ) -> ChatResult<Profile> {
        sqlx::query_as(
            "INSERT INTO profiles (id, full_name, phone, role) VALUES (?, ?, ?, ?) ON CONFLICT(id) DO UPDATE SET full_name = excluded.full_name, phone = excluded.phone RETURNING id, full_name, phone, role",
        )
        .bind(principal_id)
        .bind(full_name)
        .bind(phone)
        .bind(Role::Buyer)
        .fetch_one(&**self.connection)
        .await
        .map_err(storage)
    }
}

#[injectable(ContractRepository)]
pub struct DbContractRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbContractRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

impl DbContractRepository {
    async fn fetch_contract<'e, E>(executor: E, contract_id: &str) -> sqlx::Result<Option<Contract>>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        sqlx::query_as(&format!("{SELECT_CONTRACT} WHERE contracts.id = ?"))
            .bind(contract_id)
            .fetch_optional(executor)
            .await
    }
}

#[async_trait]
impl ContractRepository for DbContractRepository {
    async fn create_contract(
        &self,
        contract_id: &str,
        plan_id: &str,
        buyer_id: &str,
        contracted_at: DateTime<Utc>,
    ) -> ChatResult<Contract> {
        let mut tx = self.connection.begin().await.map_err(storage)?;

        sqlx::query(
            "INSERT INTO contracts (id, plan_id, user_id, status, contracted_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(contract_id)
        .bind(plan_id)
        .bind(buyer_id)
        .bind(ContractStatus::Pending)
        .bind(contracted_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let contract = Self::fetch_contract(&mut *tx, contract_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| ChatError::NotFound(format!("no contract `{contract_id}`")))?;

        tx.commit().await.map_err(storage)?;
        Ok(contract)
    }

    async fn find_contract(&self, contract_id: &str) -> ChatResult<Option<Contract>> {
        Self::fetch_contract(&**self.connection, contract_id)
            .await
            .map_err(storage)
    }

    async fn list_contracts(&self, buyer_id: Option<&str>) -> ChatResult<Vec<Contract>> {
        match buyer_id {
            Some(buyer_id) => sqlx::query_as(&format!(
                "{SELECT_CONTRACT} WHERE contracts.user_id = ? {NEWEST_CONTRACTS_FIRST}"
            ))
            .bind(buyer_id)
            .fetch_all(&**self.connection)
            .await,
            None => sqlx::query_as(&format!("{SELECT_CONTRACT} {NEWEST_CONTRACTS_FIRST}"))
                .fetch_all(&**self.connection)
                .await,
        }
        .map_err(storage)
    }

    async fn decide_contract(
        &self,
        contract_id: &str,
        status: ContractStatus,
    ) -> ChatResult<Option<Contract>> {
        let mut tx = self.connection.begin().await.map_err(storage)?;

        let updated = sqlx::query("UPDATE contracts SET status = ? WHERE id = ? AND status = ?")
            .bind(status)
            .bind(contract_id)
            .bind(ContractStatus::Pending)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        let contract = Self::fetch_contract(&mut *tx, contract_id)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(contract)
    }

    async fn find_conversation(&self, contract_id: &str) -> ChatResult<Option<Conversation>> {
        sqlx::query_as(&format!("{SELECT_CONVERSATION} WHERE contracts.id = ?"))
            .bind(contract_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(storage)
    }

    async fn list_conversations(&self, buyer_id: Option<&str>) -> ChatResult<Vec<Conversation>> {
        match buyer_id {
            Some(buyer_id) => sqlx::query_as(&format!(
                "{SELECT_CONVERSATION} WHERE contracts.user_id = ? {NEWEST_CONTRACTS_FIRST}"
            ))
            .bind(buyer_id)
            .fetch_all(&**self.connection)
            .await,
            None => sqlx::query_as(&format!("{SELECT_CONVERSATION} {NEWEST_CONTRACTS_FIRST}"))
                .fetch_all(&**self.connection)
                .await,
        }
        .map_err(storage)
    }
}

#[injectable(PlanRepository)]
pub struct DbPlanRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbPlanRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PlanRepository for DbPlanRepository {
    async fn list_plans(&self, active_only: bool) -> ChatResult<Vec<Plan>> {
        let query = if active_only {
            "SELECT * FROM plans WHERE is_active ORDER BY price ASC, name ASC"
        } else {
            "SELECT * FROM plans ORDER BY created_at DESC, rowid DESC"
        };

        sqlx::query_as(query)
            .fetch_all(&**self.connection)
            .await
            .map_err(storage)
    }

    async fn find_plan(&self, plan_id: &str) -> ChatResult<Option<Plan>> {
        sqlx::query_as("SELECT * FROM plans WHERE id = ?")
            .bind(plan_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(storage)
    }

    async fn create_plan(
        &self,
        plan_id: &str,
        draft: &PlanDraft,
        created_at: DateTime<Utc>,
    ) -> ChatResult<Plan> {
        sqlx::query_as(
            "INSERT INTO plans (id, name, price, segment, target_audience, data_gb, minutes, sms_unlimited, social_media_details, whatsapp_details, image_url, promotion_details, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(plan_id)
        .bind(&draft.name)
        .bind(draft.price)
        .bind(&draft.segment)
        .bind(&draft.target_audience)
        .bind(draft.data_gb)
        .bind(draft.minutes)
        .bind(draft.sms_unlimited)
        .bind(&draft.social_media_details)
        .bind(&draft.whatsapp_details)
        .bind(&draft.image_url)
        .bind(&draft.promotion_details)
        .bind(draft.is_active)
        .bind(created_at)
        .fetch_one(&**self.connection)
        .await
        .map_err(storage)
    }

    async fn update_plan(&self, plan_id: &str, draft: &PlanDraft) -> ChatResult<Option<Plan>> {
        sqlx::query_as(
            "UPDATE plans SET name = ?, price = ?, segment = ?, target_audience = ?, data_gb = ?, minutes = ?, sms_unlimited = ?, social_media_details = ?, whatsapp_details = ?, image_url = ?, promotion_details = ?, is_active = ? WHERE id = ? RETURNING *",
        )
        .bind(&draft.name)
        .bind(draft.price)
        .bind(&draft.segment)
        .bind(&draft.target_audience)
        .bind(draft.data_gb)
        .bind(draft.minutes)
        .bind(draft.sms_unlimited)
        .bind(&draft.social_media_details)
        .bind(&draft.whatsapp_details)
        .bind(&draft.image_url)
        .bind(&draft.promotion_details)
        .bind(draft.is_active)
        .bind(plan_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(storage)
    }

    async fn delete_unused_plan(&self, plan_id: &str) -> ChatResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM plans WHERE id = ? AND NOT EXISTS (SELECT 1 FROM contracts WHERE contracts.plan_id = plans.id)",
        )
        .bind(plan_id)
        .execute(&**self.connection)
        .await
        .map_err(storage)?
        .rows_affected();

        Ok(deleted > 0)
    }
}

#[injectable(MessageRepository)]
pub struct DbMessageRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbMessageRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        client_ref: Option<Uuid>,
    ) -> ChatResult<Message> {
        let mut tx = self.connection.begin().await.map_err(storage)?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO messages (conversation_id, sender_id, body, client_ref) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .bind(client_ref)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let message = sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE messages.id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        since_id: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        sqlx::query_as(&format!(
            "{SELECT_MESSAGE} WHERE messages.conversation_id = ? AND messages.id > ? ORDER BY messages.created_at ASC, messages.id ASC"
        ))
        .bind(conversation_id)
        .bind(since_id.unwrap_or(0))
        .fetch_all(&**self.connection)
        .await
        .map_err(storage)
    }
}
