//! Customization collaborator gateway.
//!
//! Customizations are owned by the design service; the cart only holds a
//! reference. Asset cleanup is best-effort and must never fail a cart
//! mutation, so gateway errors stay out of the cart error taxonomy.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::CartOwner;

#[derive(Debug, Error)]
#[error("customization gateway: {0}")]
pub struct GatewayError(pub String);

/// Un-persisted customization data carried on a pending guest line.
#[derive(Clone, Debug, Deserialize)]
pub struct InlineCustomization {
    pub design: serde_json::Value,
    pub preview_url: Option<String>,
    #[serde(default)]
    pub price: Decimal,
}

#[derive(Clone, Debug)]
pub struct ResolvedCustomization {
    pub id: Uuid,
    pub preview_url: Option<String>,
}

#[async_trait]
pub trait CustomizationGateway: Send + Sync {
    /// Deletes the stored preview asset for a customization.
    async fn cleanup_asset(&self, customization_id: Uuid) -> Result<(), GatewayError>;

    /// Persists an inline customization payload and returns its reference.
    async fn resolve_or_create(&self, owner: &CartOwner, payload: &InlineCustomization) -> Result<ResolvedCustomization, GatewayError>;
}

/// NATS-backed gateway: cleanup is fire-and-forget, resolution is
/// request-reply against the design service.
pub struct NatsCustomizationGateway {
    client: async_nats::Client,
}

impl NatsCustomizationGateway {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CustomizationGateway for NatsCustomizationGateway {
    async fn cleanup_asset(&self, customization_id: Uuid) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(&serde_json::json!({ "customization_id": customization_id }))
            .map_err(|e| GatewayError(e.to_string()))?;
        self.client
            .publish("ecommerce.customizations.cleanup".to_string(), payload.into())
            .await
            .map_err(|e| GatewayError(e.to_string()))
    }

    async fn resolve_or_create(&self, owner: &CartOwner, payload: &InlineCustomization) -> Result<ResolvedCustomization, GatewayError> {
        let request = serde_json::to_vec(&serde_json::json!({
            "owner": owner,
            "design": payload.design,
            "preview_url": payload.preview_url,
            "price": payload.price,
        }))
        .map_err(|e| GatewayError(e.to_string()))?;
        let reply = self.client
            .request("ecommerce.customizations.resolve".to_string(), request.into())
            .await
            .map_err(|e| GatewayError(e.to_string()))?;

        #[derive(Deserialize)]
        struct ResolveReply { id: Uuid }
        let parsed: ResolveReply = serde_json::from_slice(&reply.payload)
            .map_err(|e| GatewayError(format!("bad resolve reply: {e}")))?;
        Ok(ResolvedCustomization { id: parsed.id, preview_url: payload.preview_url.clone() })
    }
}

/// Placeholder for deployments without a design service configured.
pub struct NoopCustomizationGateway;

#[async_trait]
impl CustomizationGateway for NoopCustomizationGateway {
    async fn cleanup_asset(&self, _customization_id: Uuid) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn resolve_or_create(&self, _owner: &CartOwner, _payload: &InlineCustomization) -> Result<ResolvedCustomization, GatewayError> {
        Err(GatewayError("no customization backend configured".into()))
    }
}

/// In-memory gateway for tests: records every call and can be flipped to
/// fail on demand.
#[derive(Default)]
pub struct CustomizationGatewayStub {
    pub cleaned: std::sync::Mutex<Vec<Uuid>>,
    pub resolved: std::sync::Mutex<Vec<Uuid>>,
    pub fail_cleanup: std::sync::atomic::AtomicBool,
    pub fail_resolve: std::sync::atomic::AtomicBool,
}

impl CustomizationGatewayStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleaned.lock().unwrap().len()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolved.lock().unwrap().len()
    }
}

#[async_trait]
impl CustomizationGateway for CustomizationGatewayStub {
    async fn cleanup_asset(&self, customization_id: Uuid) -> Result<(), GatewayError> {
        if self.fail_cleanup.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(GatewayError("cleanup unavailable".into()));
        }
        self.cleaned.lock().unwrap().push(customization_id);
        Ok(())
    }

    async fn resolve_or_create(&self, _owner: &CartOwner, payload: &InlineCustomization) -> Result<ResolvedCustomization, GatewayError> {
        if self.fail_resolve.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(GatewayError("resolve unavailable".into()));
        }
        let id = Uuid::now_v7();
        self.resolved.lock().unwrap().push(id);
        Ok(ResolvedCustomization { id, preview_url: payload.preview_url.clone() })
    }
}
