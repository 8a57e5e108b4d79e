//! Plan contract endpoints

use crate::api::ExtractUser;
use crate::api::contracts::schemas::{ContractList, CreateContract, UpdateStatus};
use crate::core::error::ChatError;
use crate::core::traits::ContractService;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_contracts).post(new_contract))
        .route("/:id/status", post(update_status))
}

async fn new_contract(
    Inject(contract_service): Inject<dyn ContractService>,
    ExtractUser(current_user): ExtractUser,
    Json(create_contract): Json<CreateContract>,
) -> Result<(StatusCode, Json<schemas::Contract>), ChatError> {
    let contract = contract_service
        .create_contract(&current_user, &create_contract.plan_id)
        .await?;

    Ok((StatusCode::CREATED, Json(contract.into())))
}

async fn list_contracts(
    Inject(contract_service): Inject<dyn ContractService>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<ContractList>, ChatError> {
    let contracts = contract_service.list_contracts(&current_user).await?;

    Ok(Json(ContractList {
        contracts: contracts.into_iter().map(schemas::Contract::from).collect(),
    }))
}

async fn update_status(
    Inject(contract_service): Inject<dyn ContractService>,
    ExtractUser(current_user): ExtractUser,
    Path(contract_id): Path<String>,
    Json(update): Json<UpdateStatus>,
) -> Result<Json<schemas::Contract>, ChatError> {
    let contract = contract_service
        .update_status(&current_user, &contract_id, update.status)
        .await?;

    Ok(Json(contract.into()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use crate::infrastructure::entities::ContractStatus;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Debug)]
    pub struct CreateContract {
        pub plan_id: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct UpdateStatus {
        pub status: ContractStatus,
    }

    #[derive(Serialize, Debug)]
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

    impl From<entities::Contract> for Contract {
        fn from(contract: entities::Contract) -> Self {
            Contract {
                id: contract.id,
                plan_id: contract.plan_id,
                plan_name: contract.plan_name,
                plan_price: contract.plan_price,
                user_id: contract.user_id,
                user_name: contract.user_name,
                status: contract.status,
                contracted_at: contract.contracted_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ContractList {
        pub contracts: Vec<Contract>,
    }
}
