use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use ember_db::models::PushSubscriptionRow;

/// Result of handing one payload to the push service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Delivered,
    /// The endpoint is permanently invalid (404/410); the subscription should go.
    Gone,
    Failed(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, subscription: &PushSubscriptionRow, payload: &serde_json::Value) -> PushStatus;
}

/// Used when no push gateway is configured.
pub struct DisabledPushTransport;

#[async_trait]
impl PushTransport for DisabledPushTransport {
    async fn deliver(&self, _subscription: &PushSubscriptionRow, _payload: &serde_json::Value) -> PushStatus {
        PushStatus::Failed("push disabled".into())
    }
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    endpoint: &'a str,
    keys: GatewayKeys<'a>,
    payload: &'a serde_json::Value,
}

#[derive(Serialize)]
struct GatewayKeys<'a> {
    p256dh: &'a str,
    auth: &'a str,
}

/// Hands deliveries to an HTTP push gateway, which owns the VAPID keys and
/// payload encryption. The gateway passes the push service's status through,
/// so 404/410 mean the browser subscription is gone.
pub struct HttpPushTransport {
    client: reqwest::Client,
    gateway_url: String,
}

impl HttpPushTransport {
    pub fn new(gateway_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            gateway_url: gateway_url.into(),
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn deliver(&self, subscription: &PushSubscriptionRow, payload: &serde_json::Value) -> PushStatus {
        let body = GatewayRequest {
            endpoint: &subscription.endpoint,
            keys: GatewayKeys {
                p256dh: &subscription.p256dh,
                auth: &subscription.auth,
            },
            payload,
        };

        let response = match self.client.post(&self.gateway_url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return PushStatus::Failed(e.to_string()),
        };

        let status = response.status();
        debug!("Push to {} -> {}", subscription.endpoint, status);
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => PushStatus::Gone,
            s if s.is_success() => PushStatus::Delivered,
            s => PushStatus::Failed(format!("push gateway returned {}", s)),
        }
    }
}
