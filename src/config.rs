use rust_decimal::Decimal;

use crate::average::AVERAGE_DECIMAL_PLACES;
use crate::error::{GradeError, Result};

/// Grading scale used by the original schools: marks out of ten.
pub const DEFAULT_MAX_SCALE: Decimal = Decimal::TEN;

/// Stored marks and averages are `NUMERIC(5,2)`.
pub const MAX_VALUE_PLACES: u32 = 2;
pub const MAX_STORABLE_SCALE: Decimal = Decimal::from_parts(99_999, 0, 0, false, 2);

/// Engine-wide settings. Coefficients live with subjects and evaluation
/// kinds; only the scale and rounding are configured here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_scale: Decimal,
    pub decimal_places: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_scale: DEFAULT_MAX_SCALE,
            decimal_places: AVERAGE_DECIMAL_PLACES,
        }
    }
}

impl EngineConfig {
    /// The scale must be positive and fit the stored column.
    pub fn with_max_scale(max_scale: Decimal) -> Result<Self> {
        if max_scale <= Decimal::ZERO
            || max_scale > MAX_STORABLE_SCALE
            || max_scale.normalize().scale() > MAX_VALUE_PLACES
        {
            return Err(GradeError::InvalidScale { max_scale });
        }
        Ok(Self {
            max_scale,
            ..Self::default()
        })
    }

    /// Check a mark before it is written.
    pub fn check_value(&self, value: Decimal) -> Result<()> {
        if value < Decimal::ZERO || value > self.max_scale {
            return Err(GradeError::ValueOutOfRange {
                value,
                max_scale: self.max_scale,
            });
        }
        if value.normalize().scale() > MAX_VALUE_PLACES {
            return Err(GradeError::ValueTooPrecise {
                value,
                places: MAX_VALUE_PLACES,
            });
        }
        Ok(())
    }

    pub fn accepts(&self, value: Decimal) -> bool {
        self.check_value(value).is_ok()
    }
}
