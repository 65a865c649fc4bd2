//! Order execution through an external trading bot.
//!
//! The bot is driven by webhooks: each call starts or closes one deal on one
//! symbol under a preconfigured long or short bot id.

mod webhook;

pub use webhook::WebhookClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Deal action understood by the execution bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealAction {
    #[serde(rename = "startDeal")]
    StartDeal,
    #[serde(rename = "closeDeal")]
    CloseDeal,
}

impl DealAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DealAction::StartDeal => "startDeal",
            DealAction::CloseDeal => "closeDeal",
        }
    }
}

impl fmt::Display for DealAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to get an acknowledgement from the execution bot.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Transport failure or timeout
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bot answered with a non-success status
    #[error("Webhook rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Delivers deal actions to the execution bot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    /// Send one action for `symbol` under bot `position_id`.
    async fn dispatch(
        &self,
        action: DealAction,
        position_id: &str,
        symbol: &str,
    ) -> Result<(), DispatchError>;
}
