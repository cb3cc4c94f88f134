//! Error types for the wagerpool engine
//!
//! Every rejected call carries an error kind and a short reason string that
//! callers can match on without parsing the display text.

use thiserror::Error;

/// Root error type for all wagerpool operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WagerError {
    /// Bad input: zero amounts, bets under the minimum, empty pool
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Operation not allowed in the current engine state
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Caller is not the identity allowed to make this call
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    /// Oracle or administrative target is not usable
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Recovery attempted before the timeout elapsed
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Internal consistency fault; the ledger would have gone negative
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no zero money")]
    ZeroWager,
    #[error("zero value")]
    ZeroCredit,
    #[error("empty balance")]
    EmptyBalance,
    #[error("small bet: {amount} is below the minimum of {minimum}")]
    SmallBet { amount: u128, minimum: u128 },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u128, available: u128 },
}

/// Engine state conflicts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("draw in progress")]
    DrawInProgress,
    #[error("no current value")]
    NoCurrentDraw,
    #[error("stopped")]
    Stopped,
    #[error("wrong receive call")]
    NothingRequested,
}

/// Caller identity checks
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("owner only")]
    OwnerOnly,
    #[error("oracle only")]
    OracleOnly,
    #[error("lottery only")]
    LotteryOnly,
    #[error("coordinator only")]
    CoordinatorOnly,
    #[error("no owner")]
    OwnerWager,
}

/// Oracle wiring and configuration-file problems
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("target is not callable")]
    TargetNotCallable,
    #[error("oracle not reachable: {0}")]
    OracleUnreachable(String),
    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    #[error("Missing required field: {0}")]
    MissingRequired(String),
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Timeout-gated operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("wait timeout: {remaining_secs}s remaining")]
    WaitTimeout { remaining_secs: u64 },
}

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    State,
    Authorization,
    Configuration,
    Timeout,
    Internal,
}

impl WagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WagerError::Validation(_) => ErrorKind::Validation,
            WagerError::State(_) => ErrorKind::State,
            WagerError::Authorization(_) => ErrorKind::Authorization,
            WagerError::Configuration(_) => ErrorKind::Configuration,
            WagerError::Timeout(_) => ErrorKind::Timeout,
            WagerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short machine-checkable reason string
    pub fn reason(&self) -> &'static str {
        match self {
            WagerError::Validation(e) => match e {
                ValidationError::ZeroWager => "no zero money",
                ValidationError::ZeroCredit => "zero value",
                ValidationError::EmptyBalance => "empty balance",
                ValidationError::SmallBet { .. } => "small bet",
                ValidationError::InvalidSettings(_) => "invalid settings",
                ValidationError::InsufficientFunds { .. } => "insufficient funds",
            },
            WagerError::State(e) => match e {
                StateError::DrawInProgress => "draw in progress",
                StateError::NoCurrentDraw => "no current value",
                StateError::Stopped => "stopped",
                StateError::NothingRequested => "wrong receive call",
            },
            WagerError::Authorization(e) => match e {
                AuthorizationError::OwnerOnly => "owner only",
                AuthorizationError::OracleOnly => "oracle only",
                AuthorizationError::LotteryOnly => "lottery only",
                AuthorizationError::CoordinatorOnly => "coordinator only",
                AuthorizationError::OwnerWager => "no owner",
            },
            WagerError::Configuration(e) => match e {
                ConfigurationError::TargetNotCallable => "target is not callable",
                ConfigurationError::OracleUnreachable(_) => "oracle not reachable",
                ConfigurationError::InvalidValue { .. } => "invalid value",
                ConfigurationError::MissingRequired(_) => "missing required",
                ConfigurationError::LoadFailed(_) => "load failed",
                ConfigurationError::SaveFailed(_) => "save failed",
            },
            WagerError::Timeout(TimeoutError::WaitTimeout { .. }) => "wait timeout",
            WagerError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for WagerError {
    fn from(e: std::io::Error) -> Self {
        WagerError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

impl From<toml::de::Error> for WagerError {
    fn from(e: toml::de::Error) -> Self {
        WagerError::Configuration(ConfigurationError::LoadFailed(format!(
            "Failed to parse TOML: {}",
            e
        )))
    }
}

impl From<serde_json::Error> for WagerError {
    fn from(e: serde_json::Error) -> Self {
        WagerError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

// Convenience type alias for Results
pub type WagerResult<T> = Result<T, WagerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err: WagerError = StateError::DrawInProgress.into();

        assert!(err.to_string().contains("State error"));
        assert!(err.to_string().contains("draw in progress"));
    }

    #[test]
    fn test_reason_is_stable() {
        let err: WagerError = ValidationError::SmallBet {
            amount: 9,
            minimum: 10,
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.reason(), "small bet");
        assert!(err.to_string().contains("minimum of 10"));
    }

    #[test]
    fn test_error_conversion() {
        let err: WagerError = TimeoutError::WaitTimeout { remaining_secs: 5 }.into();

        match err {
            WagerError::Timeout(_) => {}
            _ => panic!("Expected timeout error"),
        }
        assert_eq!(err.reason(), "wait timeout");
    }

    #[test]
    fn test_error_source() {
        let err: WagerError = AuthorizationError::OwnerOnly.into();

        assert!(err.source().is_some());
    }
}
