//! Seasonal forecasting of weekly case counts.

pub mod optimize;
pub mod sarima;

pub use sarima::{FitError, FittedSarima, ForecastPoint};

/// Shortest cycle the model accepts.
pub const MIN_SEASONAL_PERIOD: usize = 2;

/// Seasonal period for a history of `observations` weeks.
///
/// Half the history, so at least two cycles are always visible, capped at
/// `max_period` (a year of weeks by default).
pub fn seasonal_period(observations: usize, max_period: usize) -> usize {
    (observations / 2).clamp(MIN_SEASONAL_PERIOD, max_period.max(MIN_SEASONAL_PERIOD))
}

/// Observations needed before training is attempted.
pub fn minimum_history(configured_min: usize, period: usize) -> usize {
    configured_min.max(sarima::required_observations(period))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_is_half_the_history_capped() {
        assert_eq!(seasonal_period(60, 52), 30);
        assert_eq!(seasonal_period(104, 52), 52);
        assert_eq!(seasonal_period(300, 52), 52);
        assert_eq!(seasonal_period(3, 52), 2);
        assert_eq!(seasonal_period(60, 12), 12);
    }

    #[test]
    fn minimum_history_covers_the_fit_requirement() {
        assert_eq!(minimum_history(12, 6), 12);
        assert_eq!(minimum_history(12, 30), 36);
    }
}
