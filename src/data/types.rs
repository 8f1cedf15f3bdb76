//! Core data types for the backtest engine.
//!
//! Market snapshots, option quotes and trade recommendations are plain
//! immutable records: produced once per (symbol, day), never mutated.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// Type of credit spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadType {
    /// Vertical put credit spread (bull put).
    PutCredit,
    /// Vertical call credit spread (bear call).
    CallCredit,
    /// Iron condor (put and call credit spreads combined).
    IronCondor,
}

impl SpreadType {
    /// Option type of the legs for a vertical spread.
    /// Iron condors are not a single-type spread and return `None`.
    pub fn leg_type(&self) -> Option<OptionType> {
        match self {
            Self::PutCredit => Some(OptionType::Put),
            Self::CallCredit => Some(OptionType::Call),
            Self::IronCondor => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PutCredit => "put_credit",
            Self::CallCredit => "call_credit",
            Self::IronCondor => "iron_condor",
        }
    }
}

/// Book classification for a position. The two books carry distinct DTE
/// ranges and exit-rule parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookType {
    /// Standard 30-45 DTE premium-selling book.
    Primary,
    /// Short-dated high-probability book. No time stop; profit/stop only.
    IncomePop,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::IncomePop => "INCOME_POP",
        }
    }
}

/// Daily market snapshot for one underlying, produced fresh per (symbol, day)
/// by the market data gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Underlying symbol (e.g., "SPY").
    pub symbol: String,

    /// Trading date.
    pub date: NaiveDate,

    /// Close price.
    pub close: Decimal,

    /// Percent change from prior close (e.g., -2.5 = down 2.5%).
    pub percent_change: f64,

    /// Share volume.
    pub volume: i64,

    /// IV rank (0-100): current IV against its own 52-week range.
    pub iv_rank: f64,

    /// IV percentile (0-100).
    pub iv_percentile: f64,

    /// 20-day simple moving average of close.
    pub sma_20: Decimal,

    /// 14-day RSI.
    pub rsi_14: f64,
}

impl MarketSnapshot {
    /// A snapshot missing price or volume cannot be traded on.
    pub fn is_valid(&self) -> bool {
        self.close > Decimal::ZERO && self.volume > 0
    }

    /// Annualized implied volatility implied by the IV rank, used when no
    /// real option chain is available. Maps rank 0-100 onto 10%-50% vol.
    pub fn implied_volatility(&self) -> f64 {
        0.10 + (self.iv_rank.clamp(0.0, 100.0) / 100.0) * 0.40
    }
}

/// A single option quote. Either sourced from a real provider or synthesized
/// by the pricer; recomputed on demand, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    pub delta: f64,
    pub implied_volatility: f64,
}

/// All quotes for one underlying on one day, single expiration.
#[derive(Debug, Clone, Default)]
pub struct OptionChain {
    pub symbol: String,
    pub date: NaiveDate,
    pub expiration: NaiveDate,
    pub dte: i32,
    pub quotes: Vec<OptionQuote>,
}

impl OptionChain {
    /// Find the quote at an exact strike for the given type.
    pub fn at_strike(&self, option_type: OptionType, strike: Decimal) -> Option<&OptionQuote> {
        self.quotes
            .iter()
            .find(|q| q.option_type == option_type && q.strike == strike)
    }

    /// Quote whose delta magnitude is closest to the target.
    pub fn closest_by_delta(&self, option_type: OptionType, target: f64) -> Option<&OptionQuote> {
        self.quotes
            .iter()
            .filter(|q| q.option_type == option_type)
            .min_by(|a, b| {
                let da = (a.delta.abs() - target).abs();
                let db = (b.delta.abs() - target).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Sorted distinct strikes for one side of the chain.
    pub fn strikes(&self, option_type: OptionType) -> Vec<Decimal> {
        let mut strikes: Vec<_> = self
            .quotes
            .iter()
            .filter(|q| q.option_type == option_type)
            .map(|q| q.strike)
            .collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }
}

/// Structured recommendation from the decision oracle. Read-only input to
/// strike selection and sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub should_trade: bool,
    pub spread_type: SpreadType,
    /// Target delta for the short strike (magnitude, e.g. 0.15).
    pub target_delta: f64,
    /// Requested days to expiration.
    pub expiration_days: i32,
    /// Confidence score, 0-100.
    pub confidence: u8,
    /// Free-text rationale.
    pub rationale: String,
}
