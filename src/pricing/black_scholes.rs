//! Black-Scholes pricing, Greeks, and delta-targeted strike search.
//!
//! Continuous compounding, annualized volatility, time in years
//! (dte / 365). At zero DTE the model collapses to intrinsic value with
//! pinned delta and zero gamma/theta/vega.

use std::f64::consts::PI;

use rust_decimal::Decimal;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::data::{OptionType, SpreadType};

#[derive(Error, Debug)]
pub enum PricerError {
    #[error("invalid pricing input: {0}")]
    InvalidInput(String),

    #[error("delta search failed to converge on target {target_delta}")]
    Convergence { target_delta: f64 },
}

/// Premium and Greeks for a single option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionPrice {
    pub premium: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

/// Net price and Greeks for a two-leg vertical spread (short minus long).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadPrice {
    /// Net credit per share. Positive for a valid credit spread; the sign is
    /// surfaced so the caller can reject degenerate spreads.
    pub net_credit: f64,
    pub net_delta: f64,
    pub net_gamma: f64,
    pub net_theta: f64,
    pub net_vega: f64,
}

/// Black-Scholes calculator.
pub struct BlackScholes {
    /// Risk-free interest rate.
    pub rate: f64,
    /// Dividend yield.
    pub dividend: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            rate: 0.05,
            dividend: 0.01,
        }
    }
}

const DELTA_TOLERANCE: f64 = 0.005;
const MAX_SEARCH_ITERATIONS: usize = 200;

impl BlackScholes {
    pub fn new(rate: f64, dividend: f64) -> Self {
        Self { rate, dividend }
    }

    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator =
            (spot / strike).ln() + (self.rate - self.dividend + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    fn norm_cdf(x: f64) -> f64 {
        // Normal::new(0, 1) cannot fail.
        let normal = Normal::new(0.0, 1.0).unwrap();
        normal.cdf(x)
    }

    fn norm_pdf(x: f64) -> f64 {
        (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
    }

    fn validate(spot: f64, strike: f64, dte: i32, vol: f64) -> Result<(), PricerError> {
        if spot <= 0.0 || !spot.is_finite() {
            return Err(PricerError::InvalidInput(format!(
                "spot must be positive, got {spot}"
            )));
        }
        if strike <= 0.0 || !strike.is_finite() {
            return Err(PricerError::InvalidInput(format!(
                "strike must be positive, got {strike}"
            )));
        }
        if dte < 0 {
            return Err(PricerError::InvalidInput(format!(
                "days to expiry must be non-negative, got {dte}"
            )));
        }
        if dte > 0 && (vol <= 0.0 || !vol.is_finite()) {
            return Err(PricerError::InvalidInput(format!(
                "volatility must be positive, got {vol}"
            )));
        }
        Ok(())
    }

    /// Price a single option and its Greeks.
    pub fn price_greeks(
        &self,
        spot: f64,
        strike: f64,
        dte: i32,
        vol: f64,
        option_type: OptionType,
    ) -> Result<OptionPrice, PricerError> {
        Self::validate(spot, strike, dte, vol)?;

        if dte == 0 {
            // Pin-risk boundary: intrinsic value only, no time value.
            let (premium, delta) = match option_type {
                OptionType::Call => {
                    let itm = spot > strike;
                    ((spot - strike).max(0.0), if itm { 1.0 } else { 0.0 })
                }
                OptionType::Put => {
                    let itm = spot < strike;
                    ((strike - spot).max(0.0), if itm { -1.0 } else { 0.0 })
                }
            };
            return Ok(OptionPrice {
                premium,
                delta,
                gamma: 0.0,
                theta: 0.0,
                vega: 0.0,
                rho: 0.0,
            });
        }

        let time = dte as f64 / 365.0;
        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);
        let disc_d = (-self.dividend * time).exp();
        let disc_r = (-self.rate * time).exp();

        let premium = match option_type {
            OptionType::Call => {
                spot * disc_d * Self::norm_cdf(d1) - strike * disc_r * Self::norm_cdf(d2)
            }
            OptionType::Put => {
                strike * disc_r * Self::norm_cdf(-d2) - spot * disc_d * Self::norm_cdf(-d1)
            }
        };

        let delta = match option_type {
            OptionType::Call => disc_d * Self::norm_cdf(d1),
            OptionType::Put => disc_d * (Self::norm_cdf(d1) - 1.0),
        };

        let gamma = disc_d * Self::norm_pdf(d1) / (spot * vol * time.sqrt());

        // Vega per 1% change in volatility.
        let vega = spot * disc_d * Self::norm_pdf(d1) * time.sqrt() / 100.0;

        let theta_term1 = -spot * disc_d * Self::norm_pdf(d1) * vol / (2.0 * time.sqrt());
        let theta = match option_type {
            OptionType::Call => {
                let term2 = self.dividend * spot * disc_d * Self::norm_cdf(d1);
                let term3 = self.rate * strike * disc_r * Self::norm_cdf(d2);
                (theta_term1 + term2 - term3) / 365.0
            }
            OptionType::Put => {
                let term2 = self.dividend * spot * disc_d * Self::norm_cdf(-d1);
                let term3 = self.rate * strike * disc_r * Self::norm_cdf(-d2);
                (theta_term1 - term2 + term3) / 365.0
            }
        };

        // Rho per 1% rate move.
        let rho = match option_type {
            OptionType::Call => strike * time * disc_r * Self::norm_cdf(d2) / 100.0,
            OptionType::Put => -strike * time * disc_r * Self::norm_cdf(-d2) / 100.0,
        };

        Ok(OptionPrice {
            premium,
            delta,
            gamma,
            theta,
            vega,
            rho,
        })
    }

    /// Find the strike whose delta magnitude matches `target_delta` within
    /// tolerance, by bisection over strike space. The result is rounded to
    /// the symbol's strike `increment`.
    ///
    /// Put delta magnitude increases with strike; call delta magnitude
    /// decreases. Both are monotonic, so the bracket [30% spot, 250% spot]
    /// always contains the target for practical delta values.
    pub fn find_strike_for_delta(
        &self,
        spot: f64,
        target_delta: f64,
        dte: i32,
        vol: f64,
        option_type: OptionType,
        increment: Decimal,
    ) -> Result<Decimal, PricerError> {
        let target = target_delta.abs();
        if !(0.0..1.0).contains(&target) || target == 0.0 {
            return Err(PricerError::InvalidInput(format!(
                "target delta must be in (0, 1), got {target_delta}"
            )));
        }
        Self::validate(spot, spot, dte, vol)?;
        if dte == 0 {
            return Err(PricerError::Convergence {
                target_delta: target,
            });
        }

        let mut lo = spot * 0.30;
        let mut hi = spot * 2.50;
        let mut strike = spot;

        for _ in 0..MAX_SEARCH_ITERATIONS {
            strike = (lo + hi) / 2.0;
            let delta = self
                .price_greeks(spot, strike, dte, vol, option_type)?
                .delta
                .abs();

            if (delta - target).abs() <= DELTA_TOLERANCE {
                return round_to_increment(strike, increment);
            }

            let too_high = match option_type {
                // Put |delta| grows with strike: overshoot means move down.
                OptionType::Put => delta > target,
                // Call |delta| shrinks with strike: overshoot means move up.
                OptionType::Call => delta < target,
            };
            if too_high {
                hi = strike;
            } else {
                lo = strike;
            }
        }

        let final_delta = self
            .price_greeks(spot, strike, dte, vol, option_type)?
            .delta
            .abs();
        if (final_delta - target).abs() <= DELTA_TOLERANCE {
            round_to_increment(strike, increment)
        } else {
            Err(PricerError::Convergence {
                target_delta: target,
            })
        }
    }

    /// Price a two-leg vertical credit spread: short leg premium minus long
    /// leg premium, with net Greeks.
    pub fn price_spread(
        &self,
        spot: f64,
        short_strike: f64,
        long_strike: f64,
        dte: i32,
        vol: f64,
        spread_type: SpreadType,
    ) -> Result<SpreadPrice, PricerError> {
        let leg_type = spread_type.leg_type().ok_or_else(|| {
            PricerError::InvalidInput(
                "iron condors are priced per vertical, not as a single spread".to_string(),
            )
        })?;

        let short = self.price_greeks(spot, short_strike, dte, vol, leg_type)?;
        let long = self.price_greeks(spot, long_strike, dte, vol, leg_type)?;

        Ok(SpreadPrice {
            net_credit: short.premium - long.premium,
            net_delta: short.delta - long.delta,
            net_gamma: short.gamma - long.gamma,
            net_theta: short.theta - long.theta,
            net_vega: short.vega - long.vega,
        })
    }
}

fn round_to_increment(strike: f64, increment: Decimal) -> Result<Decimal, PricerError> {
    let inc: f64 = increment.try_into().unwrap_or(1.0);
    if inc <= 0.0 {
        return Err(PricerError::InvalidInput(format!(
            "strike increment must be positive, got {increment}"
        )));
    }
    let rounded = (strike / inc).round() * inc;
    Decimal::try_from(rounded)
        .map(|d| d.round_dp(2))
        .map_err(|_| PricerError::InvalidInput(format!("strike {rounded} not representable")))
}
