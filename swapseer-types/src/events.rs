use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage a trade attempt has reached. Emitted in order; a trade ends with
/// exactly one of `Confirmed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStage {
    Validated,
    Quoted,
    Built,
    Signed,
    Broadcast,
    Confirmed,
    Failed,
}

/// Lifecycle record for one trade attempt, broadcast to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: Uuid,
    pub stage: TradeStage,
    pub signature: Option<String>, // base58, once known
    pub details: String,           // e.g. error kind or amounts
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(trade_id: Uuid, stage: TradeStage, details: impl Into<String>) -> Self {
        Self {
            trade_id,
            stage,
            signature: None,
            details: details.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_signature(mut self, signature: impl ToString) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, TradeStage::Confirmed | TradeStage::Failed)
    }
}
