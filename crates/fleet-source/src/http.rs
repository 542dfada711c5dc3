//! REST client for the fleet backend

use async_trait::async_trait;
use fleet_core::{DroneId, Order, OrderId, RestaurantId};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::record::kind_of;
use crate::{
    decode_fleet, DroneNotice, DronePatch, DroneRecord, NoticeBody, OrderPatch, RestaurantPatch,
    SourceError, SourceResult, TelemetrySource,
};

/// Backend connection settings
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL including the API prefix, e.g. `http://127.0.0.1:4000/api`
    pub base_url: String,
    /// Upper bound on any single request
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000/api".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// [`TelemetrySource`] backed by the REST backend
#[derive(Clone)]
pub struct HttpTelemetrySource {
    client: Client,
    base_url: String,
}

impl HttpTelemetrySource {
    pub fn new(config: SourceConfig) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::Http(format!("failed to build HTTP client: {}", e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!("Telemetry source: {} (timeout {:?})", base_url, config.timeout);

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> SourceResult<Value> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = check(self.client.get(&url).send().await?, &url)?;
        Ok(response.json::<Value>().await?)
    }

    async fn patch_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> SourceResult<()> {
        let url = self.url(path);
        debug!("PATCH {}", url);
        check(self.client.patch(&url).json(body).send().await?, &url)?;
        Ok(())
    }
}

fn check(response: Response, url: &str) -> SourceResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SourceError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

/// Decode an order list, skipping entries that are not orders
fn decode_orders(body: Value) -> SourceResult<Vec<Order>> {
    let Value::Array(entries) = body else {
        return Err(SourceError::Decode(format!(
            "order list is not an array: {}",
            kind_of(&body)
        )));
    };

    let orders = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Order>(entry) {
            Ok(order) => Some(order),
            Err(e) => {
                warn!("Skipping malformed order: {}", e);
                None
            }
        })
        .collect();
    Ok(orders)
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn fetch_drones(&self) -> SourceResult<Vec<DroneRecord>> {
        let body = self.get_json("drones").await?;
        decode_fleet(&body)
    }

    async fn fetch_orders(&self) -> SourceResult<Vec<Order>> {
        let body = self.get_json("orders").await?;
        decode_orders(body)
    }

    async fn fetch_order(&self, id: &OrderId) -> SourceResult<Option<Order>> {
        match self.get_json(&format!("orders/{}", id)).await {
            Ok(body) => Ok(Some(serde_json::from_value(body)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn patch_drone(&self, id: &DroneId, patch: &DronePatch) -> SourceResult<()> {
        self.patch_json(&format!("drones/{}", id), patch).await
    }

    async fn patch_order(&self, id: &OrderId, patch: &OrderPatch) -> SourceResult<()> {
        self.patch_json(&format!("orders/{}", id), patch).await
    }

    async fn patch_restaurant(
        &self,
        id: &RestaurantId,
        patch: &RestaurantPatch,
    ) -> SourceResult<()> {
        self.patch_json(&format!("restaurants/{}", id), patch).await
    }

    async fn notify_drone(
        &self,
        id: &DroneId,
        notice: DroneNotice,
        body: &NoticeBody,
    ) -> SourceResult<()> {
        let url = self.url(&format!("drones/{}/{}", id, notice.path()));
        debug!("POST {}", url);
        check(self.client.post(&url).json(body).send().await?, &url)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_is_normalized() {
        let source = HttpTelemetrySource::new(SourceConfig {
            base_url: "http://backend:4000/api/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(source.base_url(), "http://backend:4000/api");
        assert_eq!(source.url("drones"), "http://backend:4000/api/drones");
    }

    #[test]
    fn test_decode_orders_skips_malformed() {
        let orders = decode_orders(json!([
            { "id": "o-1", "restaurantId": "rest_2" },
            { "restaurantId": "missing id" },
            "garbage"
        ]))
        .unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, OrderId::new("o-1"));
        assert!(decode_orders(json!({ "orders": [] })).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let source = HttpTelemetrySource::new(SourceConfig {
            base_url: "http://127.0.0.1:1/api".to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();

        assert!(source.fetch_drones().await.is_err());
    }
}
