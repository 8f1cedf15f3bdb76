//! Spread position lifecycle.
//!
//! A position is opened once and then only ever reduced: every exit, partial
//! or full, appends a [`PartialExit`] record and moves realized P&L forward.
//! Closed contracts plus remaining contracts always equals the opened total,
//! and a position never reopens.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{BookType, SpreadType};

/// Reason a position (or part of one) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Mark reached 150% of the credit received.
    StopLoss,
    /// 21 DTE or less on the primary book.
    TimeStop,
    /// 90% of credit captured: full close.
    ProfitTier90,
    /// 75% of credit captured: scale out.
    ProfitTier75,
    /// 50% of credit captured: scale out.
    ProfitTier50,
    /// Simple profit target for small positions.
    ProfitTarget,
    /// Forced close at the end of the backtest window.
    EndOfBacktest,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TimeStop => "time_stop",
            Self::ProfitTier90 => "profit_90",
            Self::ProfitTier75 => "profit_75",
            Self::ProfitTier50 => "profit_50",
            Self::ProfitTarget => "profit_target",
            Self::EndOfBacktest => "end_of_backtest",
        }
    }
}

/// Status of a position. Transitions only move forward:
/// Open -> PartiallyClosed -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

/// Which profit tiers have already fired. Tiers are strictly monotonic:
/// each fires at most once, flags never reset, and firing a higher tier
/// retires every tier below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFlags {
    pub fired_50: bool,
    pub fired_75: bool,
    pub fired_90: bool,
}

/// One exit event: a partial scale-out or the final close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub date: NaiveDate,
    pub contracts: u32,
    /// Cost to close one contract, in dollars (already x100).
    pub exit_cost: Decimal,
    /// Realized P&L for the exited contracts.
    pub pnl: Decimal,
    pub reason: ExitReason,
}

/// An open or closed credit spread position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Ledger-assigned id, sequential per run. Zero until the position is
    /// registered with a [`crate::ledger::TradeLedger`].
    pub id: u64,
    pub symbol: String,
    pub book: BookType,
    pub spread_type: SpreadType,
    pub entry_date: NaiveDate,
    pub expiration: NaiveDate,
    pub entry_dte: i32,
    pub short_strike: Decimal,
    pub long_strike: Decimal,
    /// Credit received per contract, in dollars (price x 100).
    pub entry_credit: Decimal,
    /// Underlying price at entry.
    pub entry_spot: Decimal,
    /// Implied volatility at entry; used for synthetic marks.
    pub entry_volatility: f64,
    pub short_delta: f64,
    pub confidence: u8,
    pub total_contracts: u32,
    pub remaining_contracts: u32,
    pub status: PositionStatus,
    pub tier_flags: TierFlags,
    pub exits: Vec<PartialExit>,
    /// Realized P&L accumulated across all exits so far.
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    /// Spread width in strike dollars.
    pub fn width(&self) -> Decimal {
        (self.short_strike - self.long_strike).abs()
    }

    /// Worst-case loss for one contract: width minus credit, per 100 shares.
    pub fn max_loss_per_contract(&self) -> Decimal {
        self.width() * Decimal::from(100) - self.entry_credit
    }

    /// Largest possible cost to close one contract. Marks above this are
    /// clamped so realized losses never exceed the defined risk.
    pub fn max_exit_cost(&self) -> Decimal {
        self.width() * Decimal::from(100)
    }

    pub fn current_dte(&self, date: NaiveDate) -> i32 {
        (self.expiration - date).num_days() as i32
    }

    pub fn days_held(&self, date: NaiveDate) -> i32 {
        (date - self.entry_date).num_days() as i32
    }

    /// Fraction of the credit captured at the given per-contract cost to
    /// close: 1.0 means the spread is worthless (max profit).
    pub fn profit_fraction(&self, exit_cost: Decimal) -> f64 {
        if self.entry_credit <= Decimal::ZERO {
            return 0.0;
        }
        let captured: f64 = (self.entry_credit - exit_cost)
            .try_into()
            .unwrap_or(0.0);
        let credit: f64 = self.entry_credit.try_into().unwrap_or(1.0);
        captured / credit
    }

    /// Cost to close as a multiple of the credit received. 1.5 or more
    /// trips the stop.
    pub fn loss_multiple(&self, exit_cost: Decimal) -> f64 {
        if self.entry_credit <= Decimal::ZERO {
            return 0.0;
        }
        let cost: f64 = exit_cost.try_into().unwrap_or(0.0);
        let credit: f64 = self.entry_credit.try_into().unwrap_or(1.0);
        cost / credit
    }

    /// Unrealized P&L on the remaining contracts at the given mark.
    pub fn unrealized_pnl(&self, exit_cost: Decimal) -> Decimal {
        let cost = exit_cost.clamp(Decimal::ZERO, self.max_exit_cost());
        (self.entry_credit - cost) * Decimal::from(self.remaining_contracts)
    }

    /// Close `contracts` of the position at `exit_cost` per contract.
    ///
    /// The request is capped at the remaining size, the mark is clamped to
    /// the maximum exit cost, and the exit is recorded. Returns the realized
    /// P&L for this exit; `None` if the position is already closed or the
    /// request is for zero contracts.
    pub fn apply_exit(
        &mut self,
        date: NaiveDate,
        contracts: u32,
        exit_cost: Decimal,
        reason: ExitReason,
    ) -> Option<Decimal> {
        if self.status == PositionStatus::Closed || contracts == 0 {
            return None;
        }

        let contracts = contracts.min(self.remaining_contracts);
        let cost = exit_cost.clamp(Decimal::ZERO, self.max_exit_cost());
        let pnl = (self.entry_credit - cost) * Decimal::from(contracts);

        self.remaining_contracts -= contracts;
        self.realized_pnl += pnl;
        self.status = if self.remaining_contracts == 0 {
            PositionStatus::Closed
        } else {
            PositionStatus::PartiallyClosed
        };
        // Higher tiers retire the ones below: once 75 has fired, a pullback
        // into the 50 band must not scale out another slice.
        match reason {
            ExitReason::ProfitTier50 => self.tier_flags.fired_50 = true,
            ExitReason::ProfitTier75 => {
                self.tier_flags.fired_50 = true;
                self.tier_flags.fired_75 = true;
            }
            ExitReason::ProfitTier90 => {
                self.tier_flags.fired_50 = true;
                self.tier_flags.fired_75 = true;
                self.tier_flags.fired_90 = true;
            }
            _ => {}
        }
        self.exits.push(PartialExit {
            date,
            contracts,
            exit_cost: cost,
            pnl,
            reason,
        });

        Some(pnl)
    }

    pub fn closed_contracts(&self) -> u32 {
        self.total_contracts - self.remaining_contracts
    }

    pub fn exit_date(&self) -> Option<NaiveDate> {
        if self.status == PositionStatus::Closed {
            self.exits.last().map(|e| e.date)
        } else {
            None
        }
    }

    pub fn final_exit_reason(&self) -> Option<ExitReason> {
        if self.status == PositionStatus::Closed {
            self.exits.last().map(|e| e.reason)
        } else {
            None
        }
    }
}

/// Builder for credit spread positions.
pub struct SpreadPositionBuilder {
    symbol: String,
    book: BookType,
    spread_type: SpreadType,
    entry_date: NaiveDate,
    expiration: NaiveDate,
    entry_dte: i32,
    short_strike: Decimal,
    long_strike: Decimal,
    credit_per_share: Decimal,
    entry_spot: Decimal,
    entry_volatility: f64,
    short_delta: f64,
    confidence: u8,
    contracts: u32,
}

impl SpreadPositionBuilder {
    pub fn new(symbol: &str, spread_type: SpreadType, entry_date: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_string(),
            book: BookType::Primary,
            spread_type,
            entry_date,
            expiration: entry_date,
            entry_dte: 0,
            short_strike: Decimal::ZERO,
            long_strike: Decimal::ZERO,
            credit_per_share: Decimal::ZERO,
            entry_spot: Decimal::ZERO,
            entry_volatility: 0.0,
            short_delta: 0.0,
            confidence: 0,
            contracts: 1,
        }
    }

    pub fn book(mut self, book: BookType) -> Self {
        self.book = book;
        self
    }

    pub fn strikes(mut self, short: Decimal, long: Decimal) -> Self {
        self.short_strike = short;
        self.long_strike = long;
        self
    }

    /// Credit per share; stored on the position as dollars per contract.
    pub fn credit(mut self, per_share: Decimal) -> Self {
        self.credit_per_share = per_share;
        self
    }

    pub fn expiration(mut self, expiration: NaiveDate, dte: i32) -> Self {
        self.expiration = expiration;
        self.entry_dte = dte;
        self
    }

    pub fn market(mut self, spot: Decimal, volatility: f64, short_delta: f64) -> Self {
        self.entry_spot = spot;
        self.entry_volatility = volatility;
        self.short_delta = short_delta;
        self
    }

    pub fn confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn contracts(mut self, contracts: u32) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn build(self) -> Position {
        Position {
            id: 0,
            symbol: self.symbol,
            book: self.book,
            spread_type: self.spread_type,
            entry_date: self.entry_date,
            expiration: self.expiration,
            entry_dte: self.entry_dte,
            short_strike: self.short_strike,
            long_strike: self.long_strike,
            entry_credit: self.credit_per_share * Decimal::from(100),
            entry_spot: self.entry_spot,
            entry_volatility: self.entry_volatility,
            short_delta: self.short_delta,
            confidence: self.confidence,
            total_contracts: self.contracts,
            remaining_contracts: self.contracts,
            status: PositionStatus::Open,
            tier_flags: TierFlags::default(),
            exits: Vec::new(),
            realized_pnl: Decimal::ZERO,
        }
    }
}
