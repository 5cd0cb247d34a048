//! Central error taxonomy for the sniper core.
//!
//! Every failure in the pipeline maps to one of five categories so that
//! metrics, retry policy, and supervision can key off a stable label.

use thiserror::Error;

/// High-level error categories driving propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// I/O, timeouts, connection loss. Retryable with backoff.
    Transport,
    /// Parse failures, unexpected shapes, missing fields. Drop message, continue.
    Protocol,
    /// A gate rejected the candidate. Terminal for the candidate, never retried.
    Policy,
    /// On-chain outcome: simulation failed, blockhash expired, slippage, funds.
    Onchain,
    /// Internal invariant violated. Fatal to the task; supervisor restarts it.
    Logic,
}

impl ErrorCategory {
    /// Metric label for this category.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Onchain => "onchain",
            ErrorCategory::Logic => "logic",
        }
    }
}

/// Standardized error type with category and context.
#[derive(Error, Debug)]
pub enum SniperError {
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<anyhow::Error>,
    },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("policy rejection [{check}]: {message}")]
    Policy { check: String, message: String },

    #[error("onchain error [{kind}]: {message}")]
    Onchain { kind: OnchainErrorKind, message: String },

    #[error("logic error: {message}")]
    Logic { message: String },
}

/// Classification of on-chain submission failures, consumed by the fee tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnchainErrorKind {
    Timeout,
    BlockhashExpired,
    InsufficientFunds,
    SlippageExceeded,
    Unknown,
}

impl OnchainErrorKind {
    /// Stable label used for metrics and fee-tuner feedback.
    pub fn as_str(&self) -> &'static str {
        match self {
            OnchainErrorKind::Timeout => "timeout",
            OnchainErrorKind::BlockhashExpired => "blockhash_expired",
            OnchainErrorKind::InsufficientFunds => "insufficient_funds",
            OnchainErrorKind::SlippageExceeded => "slippage_exceeded",
            OnchainErrorKind::Unknown => "unknown",
        }
    }

    /// Classify a free-form error string from an RPC or aggregator response.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("timeout") || msg.contains("timed out") {
            OnchainErrorKind::Timeout
        } else if msg.contains("blockhash") {
            OnchainErrorKind::BlockhashExpired
        } else if msg.contains("insufficient") {
            OnchainErrorKind::InsufficientFunds
        } else if msg.contains("slippage") {
            OnchainErrorKind::SlippageExceeded
        } else {
            OnchainErrorKind::Unknown
        }
    }
}

impl std::fmt::Display for OnchainErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SniperError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SniperError::Transport { .. } => ErrorCategory::Transport,
            SniperError::Protocol { .. } => ErrorCategory::Protocol,
            SniperError::Policy { .. } => ErrorCategory::Policy,
            SniperError::Onchain { .. } => ErrorCategory::Onchain,
            SniperError::Logic { .. } => ErrorCategory::Logic,
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    pub fn transport_with_source<S: Into<String>>(message: S, source: anyhow::Error) -> Self {
        Self::Transport { message: message.into(), source: Some(source) }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn policy<C: Into<String>, M: Into<String>>(check: C, message: M) -> Self {
        Self::Policy { check: check.into(), message: message.into() }
    }

    pub fn onchain<S: Into<String>>(kind: OnchainErrorKind, message: S) -> Self {
        Self::Onchain { kind, message: message.into() }
    }

    pub fn logic<S: Into<String>>(message: S) -> Self {
        Self::Logic { message: message.into() }
    }

    /// The gate-check label for policy rejections ("none" otherwise).
    pub fn policy_check(&self) -> &str {
        match self {
            SniperError::Policy { check, .. } => check,
            _ => "none",
        }
    }

    /// True when the executor retry loop may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Onchain
        )
    }
}

pub type SniperResult<T> = Result<T, SniperError>;
