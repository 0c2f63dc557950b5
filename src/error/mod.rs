use thiserror::Error;
use std::fmt;
use reqwest::StatusCode;
use solana_sdk::signature::Signature;

mod utils;
pub use utils::*;

/// Errors surfaced by the trade engine and its collaborators.
///
/// Control flow never inspects the message text; callers match on the
/// variant or on [`SwapError::kind`].
#[derive(Error, Debug, Clone)]
pub enum SwapError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: u64,
        available: u64,
    },

    #[error("No route found: {0}")]
    NoRouteFound(String),

    #[error("Quote expired: issued {age_ms}ms ago")]
    QuoteExpired {
        age_ms: u64,
    },

    #[error("Transaction build error: {0}")]
    Build(String),

    #[error("Request rejected by the wallet")]
    UserRejection,

    #[error("Slippage tolerance exceeded for transaction {signature}")]
    SlippageExceeded {
        signature: Signature,
    },

    #[error("Transaction {signature} failed on-chain: {message}")]
    TransactionFailed {
        signature: Signature,
        message: String,
    },

    #[error("Transaction {signature} expired: block height passed {last_valid_block_height}")]
    TransactionExpired {
        signature: Signature,
        last_valid_block_height: u64,
    },

    #[error("Timed out waiting for confirmation: {message}")]
    NetworkTimeout {
        signature: Option<Signature>,
        message: String,
    },

    #[error("API error: {service} - {message}")]
    Upstream {
        service: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Wallet not connected")]
    NotConnected,

    #[error("A trade is already in progress")]
    TradeInProgress,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy exposed to the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InsufficientBalance,
    NoRouteFound,
    QuoteExpired,
    BuildError,
    UserRejection,
    SlippageExceeded,
    TransactionFailed,
    TransactionExpired,
    NetworkTimeout,
    UpstreamError,
    InvalidState,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InsufficientBalance => "insufficient_balance",
            Self::NoRouteFound => "no_route_found",
            Self::QuoteExpired => "quote_expired",
            Self::BuildError => "build_error",
            Self::UserRejection => "user_rejection",
            Self::SlippageExceeded => "slippage_exceeded",
            Self::TransactionFailed => "transaction_failed",
            Self::TransactionExpired => "transaction_expired",
            Self::NetworkTimeout => "network_timeout",
            Self::UpstreamError => "upstream_error",
            Self::InvalidState => "invalid_state",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, SwapError>;

impl SwapError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        SwapError::InvalidInput(message.into())
    }

    pub fn build(message: impl Into<String>) -> Self {
        SwapError::Build(message.into())
    }

    pub fn api(service: impl Into<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        SwapError::Upstream {
            service: service.into(),
            message: message.into(),
            status,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::InvalidInput(_) => ErrorKind::InvalidInput,
            SwapError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            SwapError::NoRouteFound(_) => ErrorKind::NoRouteFound,
            SwapError::QuoteExpired { .. } => ErrorKind::QuoteExpired,
            SwapError::Build(_) => ErrorKind::BuildError,
            SwapError::UserRejection => ErrorKind::UserRejection,
            SwapError::SlippageExceeded { .. } => ErrorKind::SlippageExceeded,
            SwapError::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            SwapError::TransactionExpired { .. } => ErrorKind::TransactionExpired,
            SwapError::NetworkTimeout { .. } => ErrorKind::NetworkTimeout,
            SwapError::Upstream { .. } | SwapError::Network(_) => ErrorKind::UpstreamError,
            SwapError::NotConnected | SwapError::TradeInProgress | SwapError::InvalidState(_) => {
                ErrorKind::InvalidState
            }
            SwapError::Config(_) => ErrorKind::Config,
            SwapError::Serialization(_) | SwapError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Transient failures that may be retried without risk of a duplicate
    /// spend: connection-level errors, throttling and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            SwapError::Network(_) => true,
            SwapError::Upstream { status: Some(status), .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The signature of a transaction that reached the network, if any.
    pub fn signature(&self) -> Option<Signature> {
        match self {
            SwapError::SlippageExceeded { signature }
            | SwapError::TransactionFailed { signature, .. }
            | SwapError::TransactionExpired { signature, .. } => Some(*signature),
            SwapError::NetworkTimeout { signature, .. } => *signature,
            _ => None,
        }
    }

    /// Copy suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::InvalidInput => format!("Please check your input: {}", self),
            ErrorKind::InsufficientBalance => "Insufficient balance for this trade.".to_string(),
            ErrorKind::NoRouteFound => "No swap route is available for this token right now.".to_string(),
            ErrorKind::QuoteExpired => "The price quote expired. Please try again.".to_string(),
            ErrorKind::BuildError => "Could not prepare the swap transaction.".to_string(),
            ErrorKind::UserRejection => "Transaction cancelled in wallet.".to_string(),
            ErrorKind::SlippageExceeded => {
                "Price moved beyond your slippage tolerance. Try increasing slippage.".to_string()
            }
            ErrorKind::TransactionFailed => "The transaction failed on-chain.".to_string(),
            ErrorKind::TransactionExpired => {
                "The transaction expired before it was included. No funds were moved.".to_string()
            }
            ErrorKind::NetworkTimeout => match self.signature() {
                Some(sig) => format!(
                    "Confirmation timed out. Check transaction {} in an explorer before retrying.",
                    sig
                ),
                None => "The network timed out. Please try again.".to_string(),
            },
            ErrorKind::UpstreamError => "A network service is unavailable. Please try again.".to_string(),
            ErrorKind::InvalidState => match self {
                SwapError::NotConnected => "Connect your wallet first.".to_string(),
                SwapError::TradeInProgress => "A trade is already in progress.".to_string(),
                _ => "Please wait for the current operation to finish.".to_string(),
            },
            ErrorKind::Config | ErrorKind::Internal => "Something went wrong.".to_string(),
        }
    }
}

impl From<reqwest::Error> for SwapError {
    fn from(err: reqwest::Error) -> Self {
        handle_reqwest_error(err, "HTTP request")
    }
}

impl From<config::ConfigError> for SwapError {
    fn from(err: config::ConfigError) -> Self {
        SwapError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SwapError {
    fn from(err: serde_json::Error) -> Self {
        SwapError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for SwapError {
    fn from(err: bincode::Error) -> Self {
        SwapError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SwapError {
    fn from(err: std::io::Error) -> Self {
        SwapError::Internal(format!("IO error: {}", err))
    }
}

/// True for HTTP statuses that should be treated as transient.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
