//! Plan catalog endpoints. Reading is open to anonymous visitors, writing is
//! for advisors.

use crate::api::ExtractUser;
use crate::api::plans::schemas::{Plan, PlanInput, PlanList};
use crate::core::error::ChatError;
use crate::core::traits::PlanService;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_plans).post(new_plan))
        .route("/:id", get(get_plan).put(update_plan).delete(delete_plan))
}

fn principal(user: &Option<ExtractUser>) -> Option<&str> {
    user.as_ref().map(|ExtractUser(id)| id.as_str())
}

async fn list_plans(
    Inject(plan_service): Inject<dyn PlanService>,
    current_user: Option<ExtractUser>,
) -> Result<Json<PlanList>, ChatError> {
    let plans = plan_service.list_plans(principal(&current_user)).await?;

    Ok(Json(PlanList {
        plans: plans.into_iter().map(Plan::from).collect(),
    }))
}

async fn get_plan(
    Inject(plan_service): Inject<dyn PlanService>,
    current_user: Option<ExtractUser>,
    Path(plan_id): Path<String>,
) -> Result<Json<Plan>, ChatError> {
    let plan = plan_service
        .get_plan(principal(&current_user), &plan_id)
        .await?;

    Ok(Json(plan.into()))
}

async fn new_plan(
    Inject(plan_service): Inject<dyn PlanService>,
    ExtractUser(current_user): ExtractUser,
    Json(input): Json<PlanInput>,
) -> Result<(StatusCode, Json<Plan>), ChatError> {
    let plan = plan_service.create_plan(&current_user, input.into()).await?;

    Ok((StatusCode::CREATED, Json(plan.into())))
}

async fn update_plan(
    Inject(plan_service): Inject<dyn PlanService>,
    ExtractUser(current_user): ExtractUser,
    Path(plan_id): Path<String>,
    Json(input): Json<PlanInput>,
) -> Result<Json<Plan>, ChatError> {
    let plan = plan_service
        .update_plan(&current_user, &plan_id, input.into())
        .await?;

    Ok(Json(plan.into()))
}

async fn delete_plan(
    Inject(plan_service): Inject<dyn PlanService>,
    ExtractUser(current_user): ExtractUser,
    Path(plan_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    plan_service.delete_plan(&current_user, &plan_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    fn active_by_default() -> bool {
        true
    }

    /// Body of both create and update; an update replaces every field.
    #[derive(Deserialize, Debug)]
    pub struct PlanInput {
        pub name: String,
        pub price: f64,
        #[serde(default)]
        pub segment: Option<String>,
        #[serde(default)]
        pub target_audience: Option<String>,
        #[serde(default)]
        pub data_gb: Option<f64>,
        #[serde(default)]
        pub minutes: Option<i64>,
        #[serde(default)]
        pub sms_unlimited: bool,
        #[serde(default)]
        pub social_media_details: Option<String>,
        #[serde(default)]
        pub whatsapp_details: Option<String>,
        #[serde(default)]
        pub image_url: Option<String>,
        #[serde(default)]
        pub promotion_details: Option<String>,
        #[serde(default = "active_by_default")]
        pub is_active: bool,
    }

    impl From<PlanInput> for entities::PlanDraft {
        fn from(input: PlanInput) -> Self {
            entities::PlanDraft {
                name: input.name,
                price: input.price,
                segment: input.segment,
                target_audience: input.target_audience,
                data_gb: input.data_gb,
                minutes: input.minutes,
                sms_unlimited: input.sms_unlimited,
                social_media_details: input.social_media_details,
                whatsapp_details: input.whatsapp_details,
                image_url: input.image_url,
                promotion_details: input.promotion_details,
                is_active: input.is_active,
            }
        }
    }

    #[derive(Serialize, Debug)]
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

    impl From<entities::Plan> for Plan {
        fn from(plan: entities::Plan) -> Self {
            Plan {
                id: plan.id,
                name: plan.name,
                price: plan.price,
                segment: plan.segment,
                target_audience: plan.target_audience,
                data_gb: plan.data_gb,
                minutes: plan.minutes,
                sms_unlimited: plan.sms_unlimited,
                social_media_details: plan.social_media_details,
                whatsapp_details: plan.whatsapp_details,
                image_url: plan.image_url,
                promotion_details: plan.promotion_details,
                is_active: plan.is_active,
                created_at: plan.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct PlanList {
        pub plans: Vec<Plan>,
    }
}
