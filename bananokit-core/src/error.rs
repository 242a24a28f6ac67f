//! Crate-wide error taxonomy and the page-facing error code table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the crate.
pub type WalletResult<T> = std::result::Result<T, WalletError>;

/// Errors raised by the wallet core.
///
/// Page-facing surfaces never see these variants directly; they see the
/// numeric code produced by [`WalletError::provider_code`].
#[derive(Debug, Error)]
pub enum WalletError {
    /// The user rejected a pending approval request.
    #[error("user_rejected")]
    UserRejected,
    /// The origin has no permission for the requested account or operation.
    #[error("unauthorized")]
    Unauthorized,
    /// The relay does not support the requested method.
    #[error("unsupported_method: {0}")]
    UnsupportedMethod(String),
    /// The provider is not connected to the wallet.
    #[error("disconnected")]
    Disconnected,
    /// The wallet lost its connection to the ledger network.
    #[error("chain_disconnected")]
    ChainDisconnected,
    /// A parameter failed validation.
    #[error("invalid_params: {0}")]
    InvalidParams(String),
    /// Unexpected internal failure.
    #[error("internal_error: {0}")]
    InternalError(String),
    /// The supplied password does not decrypt the stored wallet.
    #[error("invalid_password")]
    InvalidPassword,
    /// The supplied mnemonic has a bad word or checksum.
    #[error("invalid_mnemonic")]
    InvalidMnemonic,
    /// The send amount exceeds the account's spendable balance.
    #[error("insufficient_balance: have {available} raw, need {required} raw")]
    InsufficientBalance {
        /// Spendable raw balance at the time of the check.
        available: u128,
        /// Requested raw amount.
        required: u128,
    },
    /// No registration exists for the requested name.
    #[error("name_not_found: {0}")]
    NameNotFound(String),
    /// The name is not syntactically valid for any supported TLD.
    #[error("invalid_name: {0}")]
    InvalidName(String),
    /// Name resolution failed for a non-registration reason.
    #[error("resolution_failed: {0}")]
    ResolutionFailed(String),
    /// All configured ledger endpoints failed. Retryable.
    #[error("network_failure: {0}")]
    NetworkFailure(String),
    /// The ledger node refused a signed block.
    #[error("broadcast_failed: {0}")]
    BroadcastFailed(String),
    /// The account frontier moved between read and sign. Non-retryable.
    #[error("chain_consistency: expected frontier {expected}, found {found}")]
    ChainConsistencyError {
        /// Frontier the block was built against.
        expected: String,
        /// Frontier observed at sign time.
        found: String,
    },
    /// Serialization/deserialization failure of a durable or wire record.
    #[error("serialization_error: {0}")]
    Serialization(String),
    /// The durable storage collaborator failed.
    #[error("storage_error: {0}")]
    Storage(String),
    /// The wallet has not been initialized with a seed yet.
    #[error("wallet_not_initialized")]
    NotInitialized,
    /// The wallet is locked and the operation needs key material.
    #[error("wallet_locked")]
    Locked,
}

impl WalletError {
    /// Maps the error to the fixed provider error-code table.
    #[must_use]
    pub const fn provider_code(&self) -> i32 {
        match self {
            Self::UserRejected => 4001,
            Self::Unauthorized
            | Self::InvalidPassword
            | Self::Locked
            | Self::NotInitialized => 4100,
            Self::UnsupportedMethod(_) => 4200,
            Self::Disconnected => 4900,
            Self::ChainDisconnected | Self::NetworkFailure(_) => 4901,
            Self::InvalidParams(_)
            | Self::InvalidMnemonic
            | Self::InvalidName(_)
            | Self::InsufficientBalance { .. } => -32602,
            _ => -32603,
        }
    }

    /// Converts the error into the payload sent across the page boundary.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.provider_code(),
            message: self.to_string(),
        }
    }
}

/// Error payload carried in provider response envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric code from the fixed provider table.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Reconstructs a [`WalletError`] on the page side from a relay payload.
    ///
    /// The mapping is lossy by design: the page only ever learns the
    /// normalized code and message.
    #[must_use]
    pub fn into_error(self) -> WalletError {
        match self.code {
            4001 => WalletError::UserRejected,
            4100 => WalletError::Unauthorized,
            4200 => WalletError::UnsupportedMethod(self.message),
            4900 => WalletError::Disconnected,
            4901 => WalletError::ChainDisconnected,
            -32602 => WalletError::InvalidParams(self.message),
            _ => WalletError::InternalError(self.message),
        }
    }
}
