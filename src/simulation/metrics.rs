//! Performance metrics for simulated runs.
//!
//! Price per share is the vault's equity curve: every depositor's return is
//! the change in price per share over their holding period.

use crate::strategy::StrategyState;
use crate::utils::{as_percent, round_to_precision, safe_div};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A point on the price-per-share curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PpsPoint {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub funding_rate: Decimal,
    pub price_per_share: Decimal,
    pub total_assets: Decimal,
    pub total_supply: Decimal,
    /// Drop from the highest price per share seen so far, as a fraction
    pub drawdown: Decimal,
    pub state: StrategyState,
}

impl PpsPoint {
    pub fn drawdown_from(peak: Decimal, price_per_share: Decimal) -> Decimal {
        if peak > Decimal::ZERO && price_per_share < peak {
            (peak - price_per_share) / peak
        } else {
            Decimal::ZERO
        }
    }
}

/// Counters collected while a scenario runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityCounts {
    pub deposits: u64,
    pub withdrawals: u64,
    pub harvests: u64,
    pub remargins: u64,
    pub unwinds: u64,
    pub resumes: u64,
    pub emergency_exits: u64,
    /// Operations that reverted
    pub failures: u64,
    /// Shares minted to the protocol fee recipient
    pub fee_shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub start_price_per_share: Decimal,
    pub end_price_per_share: Decimal,
    /// Price-per-share return over the run, in percent
    pub total_return_pct: Decimal,
    /// Simple annualisation of the run return, in percent
    pub annualized_return_pct: Decimal,
    /// Largest price-per-share drawdown, as a fraction
    pub max_drawdown: Decimal,
    /// Whether price per share never decreased between steps
    pub monotonic: bool,
    pub activity: ActivityCounts,
    pub duration_days: f64,
}

impl ScenarioMetrics {
    pub fn calculate(curve: &[PpsPoint], activity: ActivityCounts) -> Self {
        let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
            return Self::empty(activity);
        };

        let duration_secs = (last.timestamp - first.timestamp).num_seconds();
        let duration_days = duration_secs as f64 / 86400.0;

        let growth = safe_div(last.price_per_share, first.price_per_share) - Decimal::ONE;
        let total_return_pct = as_percent(growth);
        let annualized_return_pct = if duration_secs > 0 {
            as_percent(growth * Decimal::from(365 * 86400) / Decimal::from(duration_secs))
        } else {
            Decimal::ZERO
        };

        let max_drawdown = curve
            .iter()
            .map(|point| point.drawdown)
            .max()
            .unwrap_or(Decimal::ZERO);
        let monotonic = curve
            .windows(2)
            .all(|pair| pair[1].price_per_share >= pair[0].price_per_share);

        Self {
            start_price_per_share: first.price_per_share,
            end_price_per_share: last.price_per_share,
            total_return_pct,
            annualized_return_pct,
            max_drawdown,
            monotonic,
            activity,
            duration_days,
        }
    }

    pub fn empty(activity: ActivityCounts) -> Self {
        Self {
            start_price_per_share: Decimal::ONE,
            end_price_per_share: Decimal::ONE,
            total_return_pct: Decimal::ZERO,
            annualized_return_pct: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            monotonic: true,
            activity,
            duration_days: 0.0,
        }
    }

    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
SIMULATION RESULTS ({:.1} days)
═══════════════════════════════════════════════
PRICE PER SHARE
  Start:              {}
  End:                {}
  Total Return:       {}%
  Annualized Return:  {}%
  Max Drawdown:       {}%
  Monotonic:          {}

ACTIVITY
  Deposits:           {}
  Withdrawals:        {}
  Harvests:           {}
  Remargins:          {}
  Unwinds:            {}
  Resumes:            {}
  Emergency Exits:    {}
  Reverted:           {}
  Fee Shares Minted:  {}
═══════════════════════════════════════════════"#,
            self.duration_days,
            round_to_precision(self.start_price_per_share, 8),
            round_to_precision(self.end_price_per_share, 8),
            self.total_return_pct,
            self.annualized_return_pct,
            as_percent(self.max_drawdown),
            if self.monotonic { "yes" } else { "no" },
            self.activity.deposits,
            self.activity.withdrawals,
            self.activity.harvests,
            self.activity.remargins,
            self.activity.unwinds,
            self.activity.resumes,
            self.activity.emergency_exits,
            self.activity.failures,
            round_to_precision(self.activity.fee_shares, 8),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn point(day: i64, pps: Decimal, peak: Decimal) -> PpsPoint {
        PpsPoint {
            step: day as usize,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::days(day),
            price: dec!(2000),
            funding_rate: dec!(0.0001),
            price_per_share: pps,
            total_assets: pps * dec!(1000),
            total_supply: dec!(1000),
            drawdown: PpsPoint::drawdown_from(peak, pps),
            state: StrategyState::Active,
        }
    }

    #[test]
    fn test_metrics_from_rising_curve() {
        let curve = vec![
            point(0, dec!(1), dec!(1)),
            point(1, dec!(1.001), dec!(1.001)),
            point(2, dec!(1.002), dec!(1.002)),
        ];
        let metrics = ScenarioMetrics::calculate(&curve, ActivityCounts::default());

        assert_eq!(metrics.total_return_pct, dec!(0.2));
        assert_eq!(metrics.annualized_return_pct, dec!(36.5));
        assert_eq!(metrics.max_drawdown, Decimal::ZERO);
        assert!(metrics.monotonic);
        assert!((metrics.duration_days - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_track_drawdown() {
        let curve = vec![
            point(0, dec!(1), dec!(1)),
            point(1, dec!(1.1), dec!(1.1)),
            point(2, dec!(0.99), dec!(1.1)),
        ];
        let metrics = ScenarioMetrics::calculate(&curve, ActivityCounts::default());

        assert!(!metrics.monotonic);
        assert_eq!(metrics.max_drawdown, dec!(0.1));
        assert!(metrics.summary().contains("Monotonic:          no"));
    }

    #[test]
    fn test_empty_curve() {
        let metrics = ScenarioMetrics::calculate(&[], ActivityCounts::default());
        assert_eq!(metrics.end_price_per_share, Decimal::ONE);
        assert!(metrics.monotonic);
    }
}
