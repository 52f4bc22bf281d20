//! Error types for rule loading and evaluation.
//!
//! Every variant is recoverable: it is reported through
//! [`Diagnostics`](crate::Diagnostics) and only the offending rule, operation
//! or field is skipped.

use entity_store::Entity;
use thiserror::Error;

/// Errors that can occur while loading or running rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    /// Malformed selector, command or target path.
    #[error("syntax error in {context}: {message}")]
    Syntax { context: String, message: String },

    /// Rule, selector or entity storage is full.
    #[error("{what} capacity exceeded (max {max})")]
    CapacityExceeded { what: &'static str, max: usize },

    /// Expression failed or a filter produced a non-list.
    #[error("evaluation failed for rule '{rule}': {message}")]
    Evaluation { rule: String, message: String },

    /// Document field has the wrong shape or names nothing.
    #[error("cannot convert field '{field}': {message}")]
    Conversion { field: String, message: String },

    /// Entity was deactivated before write-back.
    #[error("entity {0} is no longer active")]
    StaleReference(Entity),
}

impl RuleError {
    pub(crate) fn syntax(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Syntax {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn evaluation(rule: impl Into<String>, message: impl ToString) -> Self {
        Self::Evaluation {
            rule: rule.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn conversion(field: impl Into<String>, message: impl ToString) -> Self {
        Self::Conversion {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// The category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax { .. } => ErrorKind::Syntax,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::Evaluation { .. } => ErrorKind::Evaluation,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::StaleReference(_) => ErrorKind::StaleReference,
        }
    }
}

/// Fieldless error category, for counting and filtering diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    CapacityExceeded,
    Evaluation,
    Conversion,
    StaleReference,
}

impl ErrorKind {
    pub const ALL: [Self; 5] = [
        Self::Syntax,
        Self::CapacityExceeded,
        Self::Evaluation,
        Self::Conversion,
        Self::StaleReference,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::Evaluation => "evaluation",
            Self::Conversion => "conversion",
            Self::StaleReference => "stale_reference",
        }
    }

    pub(crate) const fn slot(self) -> usize {
        match self {
            Self::Syntax => 0,
            Self::CapacityExceeded => 1,
            Self::Evaluation => 2,
            Self::Conversion => 3,
            Self::StaleReference => 4,
        }
    }
}

/// Result type for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;

pub(crate) const KIND_COUNT: usize = ErrorKind::ALL.len();
