//! Rental price calculation.
//!
//! Money is `rust_decimal::Decimal` throughout. Nothing is rounded until a
//! caller asks for [`PricingResult::rounded`] or
//! [`PricingResult::total_minor_units`] at the display/persist boundary.

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::EngineError;

/// Minor-unit precision of the storefront currency (cents).
pub const CURRENCY_DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingInput {
    /// `None` when the vehicle has no rate on file; prices to zero.
    pub daily_rate: Option<Decimal>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub extra_charges: Decimal,
    /// Percentage in `[0, 100]`.
    pub discount_percent: Decimal,
}

impl PricingInput {
    pub fn new(daily_rate: Decimal, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            daily_rate: Some(daily_rate),
            start,
            end,
            extra_charges: Decimal::ZERO,
            discount_percent: Decimal::ZERO,
        }
    }

    pub fn with_extras(mut self, extra_charges: Decimal) -> Self {
        self.extra_charges = extra_charges;
        self
    }

    pub fn with_discount(mut self, discount_percent: Decimal) -> Self {
        self.discount_percent = discount_percent;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingResult {
    pub days: u32,
    /// `days * daily_rate + extra_charges`
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    /// `subtotal - discount_amount`, never negative.
    pub total: Decimal,
}

impl PricingResult {
    pub fn zero(days: u32) -> Self {
        Self {
            days,
            subtotal: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    /// Round for display. `subtotal` and `total` are rounded half away from
    /// zero; `discount_amount` is derived so the identity still holds.
    pub fn rounded(&self, dp: u32) -> Self {
        let subtotal = round_money(self.subtotal, dp);
        let total = round_money(self.total, dp);
        Self {
            days: self.days,
            subtotal,
            discount_amount: subtotal - total,
            total,
        }
    }

    /// Total in minor units (e.g. cents for `dp = 2`). `None` if it does not
    /// fit in an `i64`.
    pub fn total_minor_units(&self, dp: u32) -> Option<i64> {
        let scale = Decimal::from(10i64.checked_pow(dp)?);
        round_money(self.total, dp).checked_mul(scale)?.to_i64()
    }
}

fn round_money(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Billable days between two dates. A same-day rental is one day.
pub fn calculate_days(start: NaiveDate, end: NaiveDate) -> u32 {
    let whole_days = (end - start).num_days().max(1);
    u32::try_from(whole_days).unwrap_or(u32::MAX)
}

/// Price a rental.
///
/// Fails only on a reversed range or a discount outside `[0, 100]`. A missing
/// or negative rate, negative extras, or arithmetic overflow prices to zero.
pub fn calculate_price(input: &PricingInput) -> Result<PricingResult, EngineError> {
    if input.end < input.start {
        return Err(EngineError::InvalidRange {
            start: input.start,
            end: input.end,
        });
    }
    let pct = input.discount_percent;
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(EngineError::InvalidDiscount(pct));
    }

    let days = calculate_days(input.start, input.end);
    let Some(rate) = input.daily_rate else {
        warn!("pricing without a daily rate, total is zero");
        return Ok(degraded(days));
    };
    if rate < Decimal::ZERO || input.extra_charges < Decimal::ZERO {
        warn!(%rate, extras = %input.extra_charges, "negative pricing input, total is zero");
        return Ok(degraded(days));
    }

    match price_parts(days, rate, input.extra_charges, pct) {
        Some(result) => Ok(result),
        None => {
            warn!(%rate, days, "pricing overflow, total is zero");
            Ok(degraded(days))
        }
    }
}

fn degraded(days: u32) -> PricingResult {
    metrics::counter!(crate::observability::PRICING_DEGRADED_TOTAL).increment(1);
    PricingResult::zero(days)
}

fn price_parts(days: u32, rate: Decimal, extras: Decimal, pct: Decimal) -> Option<PricingResult> {
    let subtotal = Decimal::from(days).checked_mul(rate)?.checked_add(extras)?;
    let discount_amount = subtotal.checked_mul(pct)?.checked_div(Decimal::ONE_HUNDRED)?;
    let total = subtotal.checked_sub(discount_amount)?;
    Some(PricingResult {
        days,
        subtotal,
        discount_amount,
        total: total.max(Decimal::ZERO),
    })
}

/// Convert a float coming from a form field. NaN and infinities are treated
/// as a missing amount.
pub fn amount_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}
