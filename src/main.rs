//! Conversation messaging service for the plan storefront
//!
//! (c) Softlandia 2025

use storefront_chat::api;
use storefront_chat::config::Settings;
use storefront_chat::core::delivery::DeliveryHub;
use storefront_chat::core::services::{
    ContractConversationRegistry, MyContractService, MyConversationService, MyPlanService,
    MyProfileService,
};
use storefront_chat::infrastructure::database::DatabaseConnection;
use storefront_chat::infrastructure::repositories::{
    DbContractRepository, DbMessageRepository, DbPlanRepository, DbProfileRepository,
};

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method, header};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use tokio::runtime::{Builder, Runtime};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(web_server_task(settings))
}

async fn web_server_task(settings: Settings) -> anyhow::Result<()> {
    let provider = ServiceCollection::new()
        .add(DatabaseConnection::singleton())
        .add(DeliveryHub::singleton())
        .add(DbProfileRepository::scoped())
        .add(DbPlanRepository::scoped())
        .add(DbContractRepository::scoped())
        .add(DbMessageRepository::scoped())
        .add(ContractConversationRegistry::scoped())
        .add(MyConversationService::scoped())
        .add(MyContractService::scoped())
        .add(MyProfileService::scoped())
        .add(MyPlanService::scoped())
        .build_provider()
        .context("invalid service configuration")?;

    provider
        .get_required::<DatabaseConnection>()
        .migrate()
        .await
        .context("failed to apply migrations")?;

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid origin {origin:?}");
                None
            }
        })
        .collect();

    let app = api::router()
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-user-id")])
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                    .allow_origin(AllowOrigin::list(origins)),
            ),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("cannot bind {}", settings.bind_address))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    info!("Shutting down...");
    Ok(())
}
