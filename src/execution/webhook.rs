//! HTTP webhook dispatcher.

use super::{DealAction, DispatchError, ExecutionDispatcher};
use crate::config::WebhookConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Serialize)]
struct TradeSignal<'a> {
    action: DealAction,
    uuid: &'a str,
    symbol: &'a str,
}

/// Posts trade signals as JSON to the bot's webhook endpoint.
pub struct WebhookClient {
    http: Client,
    url: String,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create webhook HTTP client")?;

        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl ExecutionDispatcher for WebhookClient {
    #[instrument(skip(self))]
    async fn dispatch(
        &self,
        action: DealAction,
        position_id: &str,
        symbol: &str,
    ) -> Result<(), DispatchError> {
        let signal = TradeSignal {
            action,
            uuid: position_id,
            symbol,
        };

        let response = self.http.post(&self.url).json(&signal).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook {} for {} rejected: {} {}", action, symbol, status, body);
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("Webhook {} sent for {}", action, symbol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(url: String, timeout_secs: u64) -> WebhookClient {
        WebhookClient::new(&WebhookConfig {
            url,
            long_position_id: "long-bot".to_string(),
            short_position_id: "short-bot".to_string(),
            timeout_secs,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_posts_signal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trade_signal"))
            .and(body_json(json!({
                "action": "startDeal",
                "uuid": "long-bot",
                "symbol": "DOGE_USDT"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let webhook = client(format!("{}/trade_signal", server.uri()), 5);
        assert_ok!(
            webhook
                .dispatch(DealAction::StartDeal, "long-bot", "DOGE_USDT")
                .await
        );
    }

    #[tokio::test]
    async fn test_non_200_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string("queued"))
            .mount(&server)
            .await;

        let webhook = client(server.uri(), 5);
        let err = webhook
            .dispatch(DealAction::CloseDeal, "short-bot", "ADA_USDT")
            .await
            .unwrap_err();

        match err {
            DispatchError::Status { status, body } => {
                assert_eq!(status, 202);
                assert_eq!(body, "queued");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let webhook = client(server.uri(), 1);
        let err = webhook
            .dispatch(DealAction::CloseDeal, "short-bot", "ADA_USDT")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Http(_)));
    }

    #[test]
    fn test_action_serialization() {
        assert_eq!(
            serde_json::to_string(&DealAction::CloseDeal).unwrap(),
            "\"closeDeal\""
        );
        assert_eq!(DealAction::StartDeal.to_string(), "startDeal");
    }
}
