use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{SubjectAverageLine, WeightedValue};

/// Decimal places kept on every stored or reported average.
pub const AVERAGE_DECIMAL_PLACES: u32 = 2;

/// Result of averaging one student's entries in one subject for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectMean {
    pub average: Decimal,
    pub entry_count: i32,
    /// Σ(value × coefficient) before division.
    pub weighted_points: Decimal,
}

/// Half-up rounding, so the same inputs always land on the same stored value.
pub fn round_average(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

fn weighted_mean<I>(pairs: I) -> Option<(Decimal, Decimal, usize)>
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let mut points = Decimal::ZERO;
    let mut weight = Decimal::ZERO;
    let mut count = 0usize;

    for (value, coefficient) in pairs {
        points += value * coefficient;
        weight += coefficient;
        count += 1;
    }

    if count == 0 || weight.is_zero() {
        return None;
    }

    Some((points / weight, points, count))
}

/// Weighted mean of entries by evaluation-kind coefficient.
///
/// Returns `None` when there are no entries or when every coefficient is
/// zero; a student without grades has no average, not a zero one.
pub fn subject_mean(entries: &[WeightedValue], places: u32) -> Option<SubjectMean> {
    let (mean, points, count) =
        weighted_mean(entries.iter().map(|entry| (entry.value, entry.coefficient)))?;

    Some(SubjectMean {
        average: round_average(mean, places),
        entry_count: i32::try_from(count).unwrap_or(i32::MAX),
        weighted_points: points,
    })
}

/// Weighted mean of cached subject averages by subject coefficient.
pub fn general_mean(lines: &[SubjectAverageLine], places: u32) -> Option<Decimal> {
    weighted_mean(lines.iter().map(|line| (line.average, line.coefficient)))
        .map(|(mean, _, _)| round_average(mean, places))
}

/// Plain mean of already-rounded general averages, used for the class average.
pub fn plain_mean(values: &[Decimal], places: u32) -> Option<Decimal> {
    weighted_mean(values.iter().map(|value| (*value, Decimal::ONE)))
        .map(|(mean, _, _)| round_average(mean, places))
}
