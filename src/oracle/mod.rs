//! Trade decision boundary.
//!
//! The engine asks a [`DecisionOracle`] whether a volatility event is worth
//! trading. Provider failures are a distinct signal from a well-formed "do
//! not trade" answer: the former is an [`OracleError`] the engine counts and
//! skips, the latter a recommendation with `should_trade: false`.

pub mod rate_limiter;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::data::{MarketSnapshot, SpreadType, TradeRecommendation};

pub use rate_limiter::RateLimiter;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle rate limited by provider")]
    RateLimited,

    #[error("oracle provider error: {0}")]
    Provider(String),
}

/// Portfolio context supplied alongside the snapshot.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub open_positions: usize,
    pub day_risk_remaining: Decimal,
}

/// Capability interface over the trade-decision provider.
pub trait DecisionOracle: Send + Sync {
    fn analyze(
        &self,
        snapshot: &MarketSnapshot,
        context: &AnalysisContext,
    ) -> Result<TradeRecommendation, OracleError>;
}

/// Deterministic rule-based oracle.
///
/// Stands in for an external analysis provider in tests and offline runs.
/// Direction follows the sign of the day's move, confidence scales with IV
/// rank, and very elevated IV rank flips the recommendation to a
/// short-dated income trade.
pub struct RuleOracle {
    /// Minimum IV rank worth trading at all.
    pub min_iv_rank: f64,
    /// Requested DTE for standard recommendations.
    pub standard_dte: i32,
    /// IV rank at or above which a short-dated trade is recommended.
    pub income_pop_iv_rank: f64,
    /// Requested DTE for income-pop recommendations.
    pub income_pop_dte: i32,
}

impl Default for RuleOracle {
    fn default() -> Self {
        Self {
            min_iv_rank: 40.0,
            standard_dte: 45,
            income_pop_iv_rank: 95.0,
            income_pop_dte: 10,
        }
    }
}

impl RuleOracle {
    /// Confidence from IV rank: rank 40 maps to the 70 floor, rank 100 to
    /// the top of the scale.
    fn confidence(&self, iv_rank: f64) -> u8 {
        (50.0 + iv_rank.clamp(0.0, 100.0) / 2.0).round() as u8
    }
}

impl DecisionOracle for RuleOracle {
    fn analyze(
        &self,
        snapshot: &MarketSnapshot,
        context: &AnalysisContext,
    ) -> Result<TradeRecommendation, OracleError> {
        let spread_type = if snapshot.percent_change >= 0.0 {
            SpreadType::PutCredit
        } else {
            SpreadType::CallCredit
        };

        if snapshot.iv_rank < self.min_iv_rank {
            return Ok(TradeRecommendation {
                should_trade: false,
                spread_type,
                target_delta: 0.15,
                expiration_days: self.standard_dte,
                confidence: self.confidence(snapshot.iv_rank),
                rationale: format!(
                    "iv rank {:.0} below {:.0}, premium too thin",
                    snapshot.iv_rank, self.min_iv_rank
                ),
            });
        }

        let expiration_days = if snapshot.iv_rank >= self.income_pop_iv_rank {
            self.income_pop_dte
        } else {
            self.standard_dte
        };

        debug!(
            symbol = %snapshot.symbol,
            open = context.open_positions,
            iv_rank = snapshot.iv_rank,
            "rule oracle analysis"
        );

        Ok(TradeRecommendation {
            should_trade: true,
            spread_type,
            target_delta: 0.15,
            expiration_days,
            confidence: self.confidence(snapshot.iv_rank),
            rationale: format!(
                "{:.1}% move with iv rank {:.0}, selling {} premium",
                snapshot.percent_change,
                snapshot.iv_rank,
                spread_type.as_str()
            ),
        })
    }
}
