//! Error types for the averaging and ranking engine.
//!
//! "No data" is never an error here: averages that cannot be computed are
//! returned as `None`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised at the mutation boundary or by the backing store.
#[derive(Error, Debug)]
pub enum GradeError {
    #[error("period {period_id} is closed; entries can no longer be changed")]
    PeriodClosed { period_id: Uuid },

    #[error("evaluation date {date} is outside period {period_id} ({start} to {end})")]
    InvalidDate {
        period_id: Uuid,
        date: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("{context} not found: {id}")]
    MissingReference { context: &'static str, id: Uuid },

    #[error("value {value} is outside the grading scale [0, {max_scale}]")]
    ValueOutOfRange { value: Decimal, max_scale: Decimal },

    #[error("value {value} has more than {places} decimal places")]
    ValueTooPrecise { value: Decimal, places: u32 },

    #[error("grading scale {max_scale} must be positive and at most 999.99 with two decimal places")]
    InvalidScale { max_scale: Decimal },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl GradeError {
    pub fn missing(context: &'static str, id: Uuid) -> Self {
        GradeError::MissingReference { context, id }
    }

    /// True for rejections caused by the caller's input rather than the store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, GradeError::Store(_) | GradeError::Migration(_))
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_distinguished_from_store_failures() {
        let closed = GradeError::PeriodClosed {
            period_id: Uuid::nil(),
        };
        assert!(closed.is_rejection());
        assert!(GradeError::missing("student", Uuid::nil()).is_rejection());
        assert!(!GradeError::Store(sqlx::Error::RowNotFound).is_rejection());
    }

    #[test]
    fn missing_reference_names_the_entity() {
        let err = GradeError::missing("subject", Uuid::nil());
        assert_eq!(
            err.to_string(),
            "subject not found: 00000000-0000-0000-0000-000000000000"
        );
    }
}
