//! Profile of the calling principal

use crate::api::ExtractUser;
use crate::api::profile::schemas::{Profile, UpdateProfile};
use crate::core::error::ChatError;
use crate::core::traits::ProfileService;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new().route("/", get(get_profile).put(update_profile))
}

async fn get_profile(
    Inject(profile_service): Inject<dyn ProfileService>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<Profile>, ChatError> {
    Ok(Json(profile_service.get_profile(&current_user).await?.into()))
}

async fn update_profile(
    Inject(profile_service): Inject<dyn ProfileService>,
    ExtractUser(current_user): ExtractUser,
    Json(update): Json<UpdateProfile>,
) -> Result<Json<Profile>, ChatError> {
    let profile = profile_service
        .update_profile(&current_user, &update.full_name, update.phone.as_deref())
        .await?;

    Ok(Json(profile.into()))
}

pub mod schemas {
    use crate::infrastructure::entities::{self, Role};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    pub struct Profile {
        pub id: String,
        pub full_name: String,
        pub phone: Option<String>,
        pub role: Role,
    }

    impl From<entities::Profile> for Profile {
        fn from(profile: entities::Profile) -> Self {
            Profile {
                id: profile.id,
                full_name: profile.full_name,
                phone: profile.phone,
                role: profile.role,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct UpdateProfile {
        pub full_name: String,
        #[serde(default)]
        pub phone: Option<String>,
    }
}
