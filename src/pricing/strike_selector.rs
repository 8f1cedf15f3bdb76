//! Delta-targeted strike selection for vertical credit spreads.
//!
//! Resolves the short strike from a target delta, places the long strike one
//! spread-width further out, and prices the pair. Real chain quotes take
//! priority over theoretical prices whenever the resolved strikes exist in
//! the chain.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{OptionChain, OptionType, SpreadType};

use super::black_scholes::{BlackScholes, PricerError};

/// Selector configuration: target delta, spread width, and per-symbol strike
/// increments (most underlyings trade $1 strikes; some, like XLE, $0.50).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub target_delta: f64,
    pub spread_width: Decimal,
    pub default_increment: Decimal,
    pub increments: HashMap<String, Decimal>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let mut increments = HashMap::new();
        increments.insert("XLE".to_string(), dec!(0.50));
        Self {
            target_delta: 0.15,
            spread_width: dec!(5),
            default_increment: dec!(1),
            increments,
        }
    }
}

/// A resolved spread: both strikes, net credit per share, and the short
/// leg's delta. `approximate` is set when the delta search failed and the
/// short strike was taken from the nearest listed chain strike instead.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadSelection {
    pub short_strike: Decimal,
    pub long_strike: Decimal,
    /// Net credit per share. May be non-positive for degenerate spreads;
    /// the caller decides whether to reject.
    pub net_credit: Decimal,
    pub short_delta: f64,
    pub approximate: bool,
}

pub struct StrikeSelector {
    config: SelectorConfig,
    pricer: BlackScholes,
}

impl StrikeSelector {
    pub fn new(config: SelectorConfig, pricer: BlackScholes) -> Self {
        Self { config, pricer }
    }

    pub fn increment(&self, symbol: &str) -> Decimal {
        self.config
            .increments
            .get(symbol)
            .copied()
            .unwrap_or(self.config.default_increment)
    }

    pub fn spread_width(&self) -> Decimal {
        self.config.spread_width
    }

    /// Resolve short and long strikes for a credit spread at the target
    /// delta and price it. When `chain` is supplied and carries quotes at
    /// both strikes, chain mid prices replace the theoretical credit.
    pub fn select_spread_strikes(
        &self,
        symbol: &str,
        spot: Decimal,
        dte: i32,
        vol: f64,
        spread_type: SpreadType,
        target_delta: f64,
        chain: Option<&OptionChain>,
    ) -> Result<SpreadSelection, PricerError> {
        let leg_type = spread_type.leg_type().ok_or_else(|| {
            PricerError::InvalidInput(
                "iron condors must be selected as two separate verticals".to_string(),
            )
        })?;

        let spot_f: f64 = spot.try_into().unwrap_or(0.0);
        let increment = self.increment(symbol);
        let target = if target_delta > 0.0 {
            target_delta
        } else {
            self.config.target_delta
        };

        let (short_strike, approximate) = match self.pricer.find_strike_for_delta(
            spot_f,
            target,
            dte,
            vol,
            leg_type,
            increment,
        ) {
            Ok(strike) => (strike, false),
            Err(PricerError::Convergence { .. }) => {
                let fallback = chain
                    .and_then(|c| c.closest_by_delta(leg_type, target))
                    .map(|q| q.strike)
                    .ok_or(PricerError::Convergence {
                        target_delta: target,
                    })?;
                debug!(
                    symbol,
                    strike = %fallback,
                    "delta search did not converge, using nearest chain strike"
                );
                (fallback, true)
            }
            Err(e) => return Err(e),
        };

        // Long leg sits one width further out of the money.
        let long_strike = match leg_type {
            OptionType::Put => short_strike - self.config.spread_width,
            OptionType::Call => short_strike + self.config.spread_width,
        };
        if long_strike <= Decimal::ZERO {
            return Err(PricerError::InvalidInput(format!(
                "long strike {long_strike} below zero for width {}",
                self.config.spread_width
            )));
        }

        let short_f: f64 = short_strike.try_into().unwrap_or(0.0);
        let long_f: f64 = long_strike.try_into().unwrap_or(0.0);
        let theoretical = self
            .pricer
            .price_spread(spot_f, short_f, long_f, dte, vol, spread_type)?;

        let mut net_credit = to_decimal(theoretical.net_credit);
        let mut short_delta = self
            .pricer
            .price_greeks(spot_f, short_f, dte, vol, leg_type)?
            .delta;

        // Real quotes beat the model when both legs are listed.
        if let Some(chain) = chain {
            if let (Some(short_q), Some(long_q)) = (
                chain.at_strike(leg_type, short_strike),
                chain.at_strike(leg_type, long_strike),
            ) {
                net_credit = short_q.mid - long_q.mid;
                short_delta = short_q.delta;
            }
        }

        Ok(SpreadSelection {
            short_strike,
            long_strike,
            net_credit,
            short_delta,
            approximate,
        })
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp(2)
}
