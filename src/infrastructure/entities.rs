//! Database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer = 1,
    Advisor = 2,
}

#[derive(Debug, Clone, FromRow)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

/// A mobile plan in the catalog. Inactive plans stay listed for advisors but
/// cannot be contracted.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub segment: Option<String>,
    pub target_audience: Option<String>,
    pub data_gb: Option<f64>,
    pub minutes: Option<i64>,
    pub sms_unlimited: bool,
    pub social_media_details: Option<String>,
    pub whatsapp_details: Option<String>,
    pub image_url: Option<String>,
    pub promotion_details: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything about a plan an advisor can write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDraft {
    pub name: String,
    pub price: f64,
    pub segment: Option<String>,
    pub target_audience: Option<String>,
    pub data_gb: Option<f64>,
    pub minutes: Option<i64>,
    pub sms_unlimited: bool,
    pub social_media_details: Option<String>,
    pub whatsapp_details: Option<String>,
    pub image_url: Option<String>,
    pub promotion_details: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending = 1,
    Approved = 2,
    Rejected = 3,
}

#[derive(Debug, Clone, FromRow)]
pub struct Contract {
    pub id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub plan_price: f64,
    pub user_id: String,
    pub user_name: Option<String>,
    pub status: ContractStatus,
    pub contracted_at: DateTime<Utc>,
}

/// A contract seen as a chat. The id is the contract id.
#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: String,
    pub buyer_id: String,
    pub buyer_name: Option<String>,
    pub plan_id: String,
    pub plan_name: String,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
}

/// A stored chat message. Immutable once written.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub client_ref: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
