//! OpenSASE Cart - Cart Identity and Concurrency Service

use anyhow::Result;
use axum::{extract::{Path, State}, http::{HeaderMap, StatusCode}, routing::{delete, get, post}, Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use opensase_cart::domain::value_objects::CartOwner;
use opensase_cart::service::cart::{AddItemCommand, CartConfig, CartService, CartSnapshot, ItemCustomization};
use opensase_cart::service::gateway::{CustomizationGateway, InlineCustomization, NatsCustomizationGateway, NoopCustomizationGateway};
use opensase_cart::service::identity;
use opensase_cart::service::locks::CartLockRegistry;
use opensase_cart::service::sync::{BulkSyncCoordinator, PendingLine};
use opensase_cart::store::PgCartStore;
use opensase_cart::CartError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CartService>,
    pub sync: Arc<BulkSyncCoordinator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let db = PgPoolOptions::new().max_connections(10).connect(&std::env::var("DATABASE_URL")?).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let nats = match std::env::var("NATS_URL") {
        Ok(url) => Some(async_nats::connect(&url).await?),
        Err(_) => None,
    };

    let mut config = CartConfig::default();
    if let Ok(currency) = std::env::var("CART_CURRENCY") { config.currency = currency; }
    if let Some(rate) = std::env::var("CART_GST_RATE").ok().and_then(|v| v.parse().ok()) { config.gst_rate = rate; }
    if let Some(days) = std::env::var("CART_TTL_DAYS").ok().and_then(|v| v.parse().ok()) { config.ttl_days = days; }

    let customizations: Arc<dyn CustomizationGateway> = match &nats {
        Some(client) => Arc::new(NatsCustomizationGateway::new(client.clone())),
        None => Arc::new(NoopCustomizationGateway),
    };
    let service = Arc::new(CartService::new(
        Arc::new(PgCartStore::new(db)),
        Arc::new(CartLockRegistry::new()),
        customizations,
        nats,
        config,
    ));
    let sync = Arc::new(BulkSyncCoordinator::new(service.clone()));
    let state = AppState { service, sync };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-cart"})) }))
        .route("/api/v1/cart", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/items", post(add_item))
        .route("/api/v1/cart/items/:id", delete(remove_item))
        .route("/api/v1/cart/sync", post(sync_cart))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8083".to_string());
    tracing::info!("🚀 OpenSASE Cart listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app).await?;
    Ok(())
}

fn owner_from_headers(headers: &HeaderMap) -> Result<CartOwner, (StatusCode, String)> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|raw| Uuid::parse_str(raw).map_err(|_| (StatusCode::BAD_REQUEST, "invalid x-user-id header".to_string())))
        .transpose()?;
    let session = headers.get("x-session-id").and_then(|v| v.to_str().ok());
    identity::resolve(user_id, session).ok_or((StatusCode::UNAUTHORIZED, "no user or session identity".to_string()))
}

fn reply_err(e: CartError) -> (StatusCode, String) {
    let status = match &e {
        CartError::NotFound { .. } => StatusCode::NOT_FOUND,
        CartError::Validation { .. } => StatusCode::BAD_REQUEST,
        CartError::IllegalState { .. } => StatusCode::CONFLICT,
        CartError::Storage(_) => {
            tracing::error!(error = %e, "cart storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

async fn get_cart(State(s): State<AppState>, headers: HeaderMap) -> Result<Json<CartSnapshot>, (StatusCode, String)> {
    let owner = owner_from_headers(&headers)?;
    s.service.get_or_create(&owner).await.map(Json).map_err(reply_err)
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub unit_price: Decimal,
    pub customization: Option<CustomizationRef>,
}

#[derive(Debug, Deserialize)]
pub struct CustomizationRef {
    pub id: Uuid,
    #[serde(default)]
    pub price: Decimal,
    pub preview_url: Option<String>,
}

async fn add_item(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<AddItemRequest>) -> Result<Json<CartSnapshot>, (StatusCode, String)> {
    let owner = owner_from_headers(&headers)?;
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let cmd = AddItemCommand {
        product_id: r.product_id,
        variant_id: r.variant_id,
        quantity: r.quantity,
        unit_price: r.unit_price,
        customization: r.customization.map(|c| ItemCustomization { id: c.id, price: c.price, preview_url: c.preview_url }),
    };
    s.service.add_item(&owner, cmd).await.map(Json).map_err(reply_err)
}

async fn remove_item(State(s): State<AppState>, headers: HeaderMap, Path(item_id): Path<Uuid>) -> Result<Json<CartSnapshot>, (StatusCode, String)> {
    let owner = owner_from_headers(&headers)?;
    s.service.remove_item(&owner, item_id).await.map(Json).map_err(reply_err)
}

async fn clear_cart(State(s): State<AppState>, headers: HeaderMap) -> Result<Json<CartSnapshot>, (StatusCode, String)> {
    let owner = owner_from_headers(&headers)?;
    s.service.clear_cart(&owner).await.map(Json).map_err(reply_err)
}

#[derive(Debug, Deserialize, Validate)]
pub struct SyncRequest {
    #[validate]
    pub lines: Vec<SyncLineRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SyncLineRequest {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub unit_price: Decimal,
    pub customization: Option<InlineCustomizationRequest>,
}

#[derive(Debug, Deserialize)]
pub struct InlineCustomizationRequest {
    pub design: serde_json::Value,
    pub preview_url: Option<String>,
    #[serde(default)]
    pub price: Decimal,
}

async fn sync_cart(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<SyncRequest>) -> Result<Json<CartSnapshot>, (StatusCode, String)> {
    let owner = owner_from_headers(&headers)?;
    r.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let lines = r.lines.into_iter().map(|l| PendingLine {
        product_id: l.product_id,
        variant_id: l.variant_id,
        quantity: l.quantity,
        unit_price: l.unit_price,
        customization: l.customization.map(|c| InlineCustomization { design: c.design, preview_url: c.preview_url, price: c.price }),
    }).collect();
    s.sync.sync_pending_lines(&owner, lines).await.map(Json).map_err(reply_err)
}
