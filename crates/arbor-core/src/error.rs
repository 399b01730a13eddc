use std::fmt;

use crate::block::BlockId;
use crate::chain::ChainId;

/// Machine-readable error codes for operators and embedding services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalid,
    ConfigParseError,
    BlockNotFound,
    ChainNotFound,
    InvalidArgument,
    MaskExhausted,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "E1001",
            Self::ConfigParseError => "E1002",
            Self::BlockNotFound => "E2001",
            Self::ChainNotFound => "E2002",
            Self::InvalidArgument => "E2003",
            Self::MaskExhausted => "E3001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "Ledger configuration rejected",
            Self::ConfigParseError => "Config file parse error",
            Self::BlockNotFound => "Block not found",
            Self::ChainNotFound => "Chain not found",
            Self::InvalidArgument => "Invalid argument",
            Self::MaskExhausted => "Routing mask exhausted",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid => {
                Some("Check finalized_weight >= 1 and min_num_chains <= max_num_chains.")
            }
            Self::ConfigParseError => Some("Fix syntax in ledger.toml and retry."),
            Self::BlockNotFound => {
                Some("The block is unknown, already finalized out of the live graph, or pruned.")
            }
            Self::ChainNotFound => Some("The chain was never spawned or has been merged away."),
            Self::InvalidArgument => None,
            Self::MaskExhausted => Some("Lower tree.max_mask_depth below the fingerprint width."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors returned by ledger queries and construction.
///
/// Rejected block submissions are not errors; see
/// [`SubmitOutcome`](crate::chain::SubmitOutcome).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{}: block {0} is not a live node", ErrorCode::BlockNotFound.code())]
    BlockNotFound(BlockId),

    #[error("{}: chain {0} is not registered", ErrorCode::ChainNotFound.code())]
    ChainNotFound(ChainId),

    #[error("{}: {0}", ErrorCode::InvalidArgument.code())]
    InvalidArgument(String),

    #[error("{}: {0}", ErrorCode::ConfigInvalid.code())]
    InvalidConfig(String),

    #[error("{}: {0}", ErrorCode::ConfigParseError.code())]
    ConfigParse(String),

    #[error("{}: cursor cannot advance past bit {depth}", ErrorCode::MaskExhausted.code())]
    MaskExhausted { depth: usize },
}

impl LedgerError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BlockNotFound(_) => ErrorCode::BlockNotFound,
            Self::ChainNotFound(_) => ErrorCode::ChainNotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidConfig(_) => ErrorCode::ConfigInvalid,
            Self::ConfigParse(_) => ErrorCode::ConfigParseError,
            Self::MaskExhausted { .. } => ErrorCode::MaskExhausted,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, LedgerError};
    use crate::block::BlockId;
    use crate::chain::ChainId;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigInvalid,
            ErrorCode::ConfigParseError,
            ErrorCode::BlockNotFound,
            ErrorCode::ChainNotFound,
            ErrorCode::InvalidArgument,
            ErrorCode::MaskExhausted,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::BlockNotFound.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn errors_render_their_code() {
        let err = LedgerError::BlockNotFound(BlockId::from_label("missing"));
        assert_eq!(err.code(), ErrorCode::BlockNotFound);
        assert!(err.to_string().starts_with("E2001"));

        let err = LedgerError::InvalidArgument("distance must be >= 0".into());
        assert!(err.hint().is_none());
        assert!(err.to_string().contains("distance"));

        let err = LedgerError::ChainNotFound(ChainId::new(9).unwrap());
        assert_eq!(err.code(), ErrorCode::ChainNotFound);
        assert!(err.to_string().starts_with("E2002"));
        assert!(err.hint().is_some());
    }
}
