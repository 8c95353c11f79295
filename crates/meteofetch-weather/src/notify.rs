//! Webhook delivery of newly raised alerts.
//!
//! Each alert is POSTed as its own JSON object. Delivery failures are logged
//! by the caller and never affect what was stored.

use std::sync::Arc;
use std::time::Duration;

use meteofetch_core::{AlertConfig, FetchError, ProviderConfig};
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use crate::alerts::Alert;

const USER_AGENT: &str = concat!("meteofetch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct AlertNotification<'a> {
    location: &'a str,
    latitude: f64,
    longitude: f64,
    #[serde(flatten)]
    alert: &'a Alert,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Arc<Client>,
    url: String,
    location: String,
    latitude: f64,
    longitude: f64,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        provider: &ProviderConfig,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            url: url.into(),
            location: provider.location_name.clone(),
            latitude: provider.latitude,
            longitude: provider.longitude,
        })
    }

    /// `None` when no webhook is configured or alerts are off.
    pub fn from_config(
        alerts: &AlertConfig,
        provider: &ProviderConfig,
    ) -> Result<Option<Self>, FetchError> {
        match &alerts.webhook_url {
            Some(url) if alerts.enabled && !url.trim().is_empty() => {
                Self::new(url.clone(), provider, alerts.webhook_timeout()).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, alert), fields(kind = %alert.kind), level = "debug")]
    pub async fn send(&self, alert: &Alert) -> Result<(), FetchError> {
        let body = AlertNotification {
            location: &self.location,
            latitude: self.latitude,
            longitude: self.longitude,
            alert,
        };
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(FetchError::provider(Some(status.as_u16()), text))
        }
    }

    /// Send every alert, returning how many were accepted.
    pub async fn send_all(&self, alerts: &[Alert]) -> usize {
        let mut delivered = 0;
        for alert in alerts {
            match self.send(alert).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    "Failed to deliver {} alert for {}: {}",
                    alert.kind,
                    alert.timestamp.to_rfc3339(),
                    e
                ),
            }
        }
        delivered
    }
}
