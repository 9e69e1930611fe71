//! Error taxonomy for the analytics pipeline

use thiserror::Error;

/// Domain errors raised by the pipeline.
///
/// Public functions return [`crate::Result`]; callers that need to react to a
/// specific failure can `downcast_ref::<AnalyticsError>()` the anyhow error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    /// An unsupported period granularity was requested
    #[error("invalid frequency '{given}': choose one of {expected}")]
    Configuration { given: String, expected: String },

    /// A value in the source data could not be parsed
    #[error("failed to parse {field} value '{value}': {reason}")]
    Parse {
        field: String,
        value: String,
        reason: String,
    },

    /// An order request points at a product the order does not contain
    #[error("order {order_id} requests product '{product_id}' which is not part of the order")]
    MissingReference { order_id: i64, product_id: String },

    /// Quantile binning has no population to work with
    #[error("cannot bin {column}: {reason}")]
    DegenerateBinning { column: String, reason: String },
}

impl AnalyticsError {
    pub(crate) fn parse(field: &str, value: impl ToString, reason: impl ToString) -> Self {
        AnalyticsError::Parse {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
