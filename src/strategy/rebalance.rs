//! Buffer-driven split and remargin planning.
//!
//! Pure math over a [`Position`] snapshot; the strategy executes the plans.
//! With `b = buffer / MAX_BPS`, new capital `A` is split into margin
//! `A(1 + b)/2` and long `A(1 - b)/2`, which leaves a fraction `b` of the
//! deployed value as spare margin once the long is hedged one to one.

use super::ledger::Position;
use crate::error::{StrategyError, StrategyResult};
use crate::utils::{buffer_fraction, safe_div};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

/// Want amounts new capital is split into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapitalSplit {
    /// Deposited as perpetual margin
    pub margin: Decimal,
    /// Swapped into the long asset
    pub long_want: Decimal,
}

/// Action to take for remargining.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemarginAction {
    /// Position already at target
    None,
    /// Margin short of target: sell long into margin and shrink the short
    Deleverage { sell_long: Decimal },
    /// Margin above target: withdraw the surplus, buy long and extend the short
    Releverage { surplus_margin: Decimal },
}

/// Planned remargin with its expected leverage change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemarginPlan {
    pub action: RemarginAction,
    pub target_margin: Decimal,
    /// Short notional at mark over margin, before
    pub pre_leverage: Decimal,
    /// Short notional at mark over margin, after
    pub post_leverage: Decimal,
}

/// Split and target math for one buffer setting.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceEngine {
    buffer: u64,
    slippage_tolerance: Decimal,
    dust: Decimal,
}

impl RebalanceEngine {
    pub fn new(buffer: u64, slippage_tolerance: Decimal, dust: Decimal) -> Self {
        Self {
            buffer,
            slippage_tolerance,
            dust,
        }
    }

    /// Buffer as a fraction `b` in `[0, 1]`.
    pub fn buffer_fraction(&self) -> Decimal {
        buffer_fraction(self.buffer)
    }

    /// `K = ((1 - b)/2) / ((1 - b)/2 + b)`: long value per unit of margin,
    /// and the short leverage the pool is told to target.
    pub fn target_leverage(&self) -> Decimal {
        let b = self.buffer_fraction();
        let half_long = (Decimal::ONE - b) / dec!(2);
        safe_div(half_long, half_long + b)
    }

    pub fn split(&self, amount: Decimal) -> CapitalSplit {
        let b = self.buffer_fraction();
        let margin = amount * (Decimal::ONE + b) / dec!(2);
        CapitalSplit {
            margin,
            long_want: amount - margin,
        }
    }

    /// Perpetual trade that brings the short to `-long_balance`, or `None`
    /// when the gap is below dust.
    pub fn hedge_adjustment(&self, position: &Position) -> Option<Decimal> {
        let amount = -position.long_balance - position.perp_contracts;
        if amount.abs() < self.dust || amount == Decimal::ZERO {
            return None;
        }
        Some(amount)
    }

    /// Worst acceptable execution price for a perpetual trade of `amount`.
    pub fn limit_price(&self, mark_price: Decimal, amount: Decimal) -> Decimal {
        if amount > Decimal::ZERO {
            mark_price * (Decimal::ONE + self.slippage_tolerance)
        } else {
            mark_price * (Decimal::ONE - self.slippage_tolerance)
        }
    }

    /// Minimum swap output accepted for an `expected` quote.
    pub fn min_amount_out(&self, expected: Decimal) -> Decimal {
        expected * (Decimal::ONE - self.slippage_tolerance)
    }

    /// Plan a remargin that restores the buffer at `price`, valuing the
    /// short at `mark_price` for the leverage check.
    pub fn plan_remargin(&self, position: &Position, price: Decimal, mark_price: Decimal) -> RemarginPlan {
        let b = self.buffer_fraction();
        let total = position.value(price);
        let target_margin = total * (Decimal::ONE + b) / dec!(2);
        let pre_leverage = leverage(position.perp_contracts, mark_price, position.margin);

        let gap = target_margin - position.margin;
        let long_change = safe_div(gap.abs(), price);

        let (action, new_long) = if long_change < self.dust || gap == Decimal::ZERO {
            (RemarginAction::None, position.long_balance)
        } else if gap > Decimal::ZERO {
            let sell_long = long_change.min(position.long_balance);
            (
                RemarginAction::Deleverage { sell_long },
                position.long_balance - sell_long,
            )
        } else {
            (
                RemarginAction::Releverage { surplus_margin: -gap },
                position.long_balance + long_change,
            )
        };

        let post_leverage = match action {
            RemarginAction::None => pre_leverage,
            _ => leverage(new_long, mark_price, target_margin),
        };

        debug!(
            total_value = %total,
            margin = %position.margin,
            target_margin = %target_margin,
            pre_leverage = %pre_leverage,
            post_leverage = %post_leverage,
            action = ?action,
            "Remargin planned"
        );

        RemarginPlan {
            action,
            target_margin,
            pre_leverage,
            post_leverage,
        }
    }

    /// Reject any remargin that leaves the short more levered than it was,
    /// beyond the slippage tolerance.
    pub fn check_leverage(&self, pre_leverage: Decimal, post_leverage: Decimal) -> StrategyResult<()> {
        let limit = pre_leverage
            .checked_mul(Decimal::ONE + self.slippage_tolerance)
            .unwrap_or(Decimal::MAX);
        if post_leverage > limit {
            warn!(
                pre_leverage = %pre_leverage,
                post_leverage = %post_leverage,
                limit = %limit,
                "Remargin would increase leverage"
            );
            return Err(StrategyError::RiskViolation {
                leverage: post_leverage,
                limit,
            });
        }
        Ok(())
    }
}

/// Short notional at `mark_price` over `margin`.
pub fn leverage(contracts: Decimal, mark_price: Decimal, margin: Decimal) -> Decimal {
    if margin <= Decimal::ZERO {
        return if contracts == Decimal::ZERO {
            Decimal::ZERO
        } else {
            Decimal::MAX
        };
    }
    contracts.abs() * mark_price / margin
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(buffer: u64) -> RebalanceEngine {
        RebalanceEngine::new(buffer, dec!(0.005), dec!(0.000000000000001))
    }

    fn hedged(long: Decimal, margin: Decimal) -> Position {
        Position {
            long_balance: long,
            perp_contracts: -long,
            margin,
        }
    }

    #[test]
    fn test_split_leaves_buffer_as_spare_margin() {
        let engine = engine(200_000);
        let split = engine.split(dec!(10000));
        assert_eq!(split.margin, dec!(6000));
        assert_eq!(split.long_want, dec!(4000));

        // At price 1000: long 4, short 4, margin 6000
        let position = hedged(dec!(4), split.margin);
        assert_eq!(position.buffer_ratio(dec!(1000)), dec!(0.2));
        assert_eq!(engine.target_leverage(), dec!(4000) / dec!(6000));
    }

    #[test]
    fn test_target_leverage_bounds() {
        assert_eq!(engine(0).target_leverage(), Decimal::ONE);
        assert_eq!(engine(1_000_000).target_leverage(), Decimal::ZERO);
    }

    #[test]
    fn test_hedge_adjustment_skips_dust() {
        let engine = engine(200_000);
        let position = Position {
            long_balance: dec!(4),
            perp_contracts: dec!(-3),
            margin: dec!(6000),
        };
        assert_eq!(engine.hedge_adjustment(&position), Some(dec!(-1)));
        assert_eq!(engine.hedge_adjustment(&hedged(dec!(4), dec!(6000))), None);

        let dusty = Position {
            perp_contracts: dec!(-4) + dec!(0.0000000000000001),
            ..hedged(dec!(4), dec!(6000))
        };
        assert_eq!(engine.hedge_adjustment(&dusty), None);
    }

    #[test]
    fn test_limit_price_direction() {
        let engine = engine(200_000);
        assert_eq!(engine.limit_price(dec!(1000), dec!(1)), dec!(1005));
        assert_eq!(engine.limit_price(dec!(1000), dec!(-1)), dec!(995));
        assert_eq!(engine.min_amount_out(dec!(100)), dec!(99.5));
    }

    #[test]
    fn test_plan_deleverage_when_buffer_raised() {
        let engine = engine(400_000);
        let plan = engine.plan_remargin(&hedged(dec!(4), dec!(6000)), dec!(1000), dec!(1000));

        assert_eq!(plan.target_margin, dec!(7000));
        assert_eq!(plan.action, RemarginAction::Deleverage { sell_long: dec!(1) });
        assert!(plan.post_leverage < plan.pre_leverage);
        assert!(engine.check_leverage(plan.pre_leverage, plan.post_leverage).is_ok());
    }

    #[test]
    fn test_plan_releverage_when_buffer_lowered() {
        let engine = engine(100_000);
        let plan = engine.plan_remargin(&hedged(dec!(4), dec!(6000)), dec!(1000), dec!(1000));

        assert_eq!(plan.target_margin, dec!(5500));
        assert_eq!(plan.action, RemarginAction::Releverage { surplus_margin: dec!(500) });
        // Lands exactly on the new target leverage, which is above the old one
        assert_eq!(plan.post_leverage, dec!(4500) / dec!(5500));
        assert!(plan.post_leverage > plan.pre_leverage);
        let err = engine
            .check_leverage(plan.pre_leverage, plan.post_leverage)
            .unwrap_err();
        assert!(matches!(err, StrategyError::RiskViolation { .. }));
    }

    #[test]
    fn test_surplus_margin_from_funding_is_not_relevered() {
        // Funding credited 50 of margin on a position already at target.
        let engine = engine(200_000);
        let plan = engine.plan_remargin(&hedged(dec!(4), dec!(6050)), dec!(1000), dec!(1000));

        assert!(matches!(plan.action, RemarginAction::Releverage { .. }));
        assert!(engine.check_leverage(plan.pre_leverage, plan.post_leverage).is_err());
    }

    #[test]
    fn test_leverage_within_slippage_of_previous_is_accepted() {
        let engine = engine(200_000);
        assert!(engine.check_leverage(dec!(0.8), dec!(0.804)).is_ok());
        assert!(engine.check_leverage(dec!(0.8), dec!(0.8041)).is_err());
        assert!(engine.check_leverage(dec!(0.8), dec!(0.5)).is_ok());
    }

    #[test]
    fn test_plan_at_target_is_noop() {
        let engine = engine(200_000);
        let plan = engine.plan_remargin(&hedged(dec!(4), dec!(6000)), dec!(1000), dec!(1000));
        assert_eq!(plan.action, RemarginAction::None);
    }

    #[test]
    fn test_leverage_increase_under_mark_premium_is_rejected() {
        let engine = engine(0);
        // Mark trades 10% over the oracle and the short has lost margin.
        let position = hedged(dec!(4), dec!(5600));
        let plan = engine.plan_remargin(&position, dec!(1000), dec!(1100));

        assert!(matches!(plan.action, RemarginAction::Releverage { .. }));
        let err = engine
            .check_leverage(plan.pre_leverage, plan.post_leverage)
            .unwrap_err();
        assert!(matches!(err, StrategyError::RiskViolation { .. }));
        assert_eq!(err.to_string(), "do not increase leverage");
    }

    #[test]
    fn test_leverage_helper() {
        assert_eq!(leverage(dec!(-2), dec!(1000), dec!(4000)), dec!(0.5));
        assert_eq!(leverage(Decimal::ZERO, dec!(1000), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(leverage(dec!(-1), dec!(1000), Decimal::ZERO), Decimal::MAX);
    }
}
