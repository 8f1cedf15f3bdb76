//! Core backtesting engine.
//!
//! Runs the simulation loop, one trading day at a time:
//! 1. Fetch snapshots for all symbols in parallel
//! 2. Screen each symbol through the volatility and trend filters
//! 3. Ask the decision oracle about survivors (rate limited)
//! 4. Select strikes, size, and open positions
//! 5. Mark and manage positions opened on prior days
//! 6. Record the daily equity point
//!
//! Symbols are processed in lexicographic order during the decide phase, so
//! a run is fully deterministic regardless of fetch scheduling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::activity::{ActivityEvent, ActivitySink};
use crate::data::{BookType, DataError, MarketDataGateway, MarketSnapshot, SpreadType};
use crate::ledger::{
    mark_exit_cost, ExitRules, Position, SpreadPositionBuilder, TradeLedger,
};
use crate::metrics::{self, PerformanceSummary};
use crate::oracle::{AnalysisContext, DecisionOracle, RateLimiter};
use crate::pricing::{BlackScholes, SelectorConfig, StrikeSelector};
use crate::risk::{PositionSizer, SizerConfig};

/// Configuration errors are the only fatal failure category: everything
/// after construction degrades to per-symbol skips.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("end date {end} is not after start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },

    #[error("no symbols configured")]
    NoSymbols,

    #[error("initial capital must be positive, got {0}")]
    NonPositiveCapital(Decimal),
}

/// Backtest configuration. Every field has a default, so a TOML config
/// only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,

    /// Minimum absolute daily move (percent) to consider a symbol.
    pub min_price_move: f64,
    /// Minimum IV rank to consider a symbol.
    pub min_iv_rank: f64,
    /// Minimum oracle confidence to act on a recommendation.
    pub confidence_threshold: u8,

    /// Primary book DTE window for new entries.
    pub primary_dte_min: i32,
    pub primary_dte_max: i32,
    /// Recommendations at or below this DTE go to the income-pop book.
    pub income_pop_dte_max: i32,

    /// Oracle rate limit: calls per rolling window.
    pub rate_limit_calls: usize,
    pub rate_limit_window_secs: u64,

    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub sizer: SizerConfig,
    #[serde(default)]
    pub exit_rules: ExitRules,

    /// Risk-free rate for the pricing model.
    pub risk_free_rate: f64,
    /// Dividend yield for the pricing model.
    pub dividend_yield: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".to_string()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            initial_capital: Decimal::from(100_000),
            min_price_move: 1.5,
            min_iv_rank: 40.0,
            confidence_threshold: 70,
            primary_dte_min: 30,
            primary_dte_max: 45,
            income_pop_dte_max: 14,
            rate_limit_calls: 4,
            rate_limit_window_secs: 60,
            selector: SelectorConfig::default(),
            sizer: SizerConfig::default(),
            exit_rules: ExitRules::default(),
            risk_free_rate: 0.05,
            dividend_yield: 0.01,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.end_date <= self.start_date {
            return Err(ConfigError::EndBeforeStart {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveCapital(self.initial_capital));
        }
        Ok(())
    }
}

/// Cooperative cancellation handle. Cheap to clone; checked at the top of
/// each simulated day. Partial results survive a cancel.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why candidates were dropped, counted per reason across the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub data_unavailable: u64,
    pub invalid_snapshot: u64,
    pub already_open: u64,
    pub price_move_too_small: u64,
    pub iv_rank_too_low: u64,
    pub trend_gate_failed: u64,
    pub oracle_failed: u64,
    pub oracle_declined: u64,
    pub direction_mismatch: u64,
    pub below_confidence_floor: u64,
    pub pricing_failed: u64,
    pub non_positive_credit: u64,
    pub sizing_rejected: u64,
}

impl RejectionCounts {
    pub fn total(&self) -> u64 {
        self.data_unavailable
            + self.invalid_snapshot
            + self.already_open
            + self.price_move_too_small
            + self.iv_rank_too_low
            + self.trend_gate_failed
            + self.oracle_failed
            + self.oracle_declined
            + self.direction_mismatch
            + self.below_confidence_floor
            + self.pricing_failed
            + self.non_positive_credit
            + self.sizing_rejected
    }
}

/// Daily equity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Decimal,
    pub cash: Decimal,
    pub unrealized: Decimal,
    pub open_positions: usize,
    pub daily_pnl: Decimal,
}

/// Point-in-time progress snapshot handed to observers. A copy, not a view:
/// it stays valid after the engine moves on.
#[derive(Debug, Clone)]
pub struct EngineProgress {
    pub date: NaiveDate,
    pub days_processed: usize,
    pub total_days: usize,
    pub equity: Decimal,
    pub open_positions: usize,
    pub closed_positions: usize,
}

/// Result of a completed (or cancelled) backtest.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_pnl: Decimal,
    pub trading_days: usize,
    pub positions: Vec<Position>,
    pub equity_curve: Vec<EquityPoint>,
    pub rejections: RejectionCounts,
    pub summary: PerformanceSummary,
    pub cancelled: bool,
}

impl BacktestResult {
    pub fn summary_text(&self) -> String {
        format!(
            "Backtest Results ({} to {})\n\
             ----------------------------------------\n\
             Final Equity: ${:.2}\n\
             Total P&L: ${:.2}\n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             \n\
             Trades: {} (W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Profit Factor: {:.2}\n\
             Avg Days In Trade: {:.1}\n\
             \n\
             Candidates Rejected: {}",
            self.start_date,
            self.end_date,
            self.final_equity,
            self.total_pnl,
            self.summary.max_drawdown_pct * 100.0,
            self.summary.sharpe_ratio,
            self.summary.total_trades,
            self.summary.winners,
            self.summary.losers,
            self.summary.win_rate * 100.0,
            self.summary.profit_factor,
            self.summary.avg_days_in_trade,
            self.rejections.total(),
        )
    }
}

/// The main backtesting engine.
pub struct BacktestEngine {
    config: BacktestConfig,
    gateway: Box<dyn MarketDataGateway>,
    oracle: Box<dyn DecisionOracle>,
    sink: Box<dyn ActivitySink>,
    pricer: BlackScholes,
    selector: StrikeSelector,
    sizer: PositionSizer,
    rate_limiter: RateLimiter,
    ledger: TradeLedger,
    cash: Decimal,
    equity: Decimal,
    equity_curve: Vec<EquityPoint>,
    rejections: RejectionCounts,
    cancel: CancelToken,
}

impl BacktestEngine {
    pub fn new(
        config: BacktestConfig,
        gateway: Box<dyn MarketDataGateway>,
        oracle: Box<dyn DecisionOracle>,
        sink: Box<dyn ActivitySink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pricer = BlackScholes::new(config.risk_free_rate, config.dividend_yield);
        let selector = StrikeSelector::new(
            config.selector.clone(),
            BlackScholes::new(config.risk_free_rate, config.dividend_yield),
        );
        let sizer = PositionSizer::new(config.sizer.clone());
        let rate_limiter = RateLimiter::new(
            config.rate_limit_calls,
            Duration::from_secs(config.rate_limit_window_secs),
        );
        let cash = config.initial_capital;
        Ok(Self {
            config,
            gateway,
            oracle,
            sink,
            pricer,
            selector,
            sizer,
            rate_limiter,
            ledger: TradeLedger::new(),
            cash,
            equity: cash,
            equity_curve: Vec::new(),
            rejections: RejectionCounts::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Handle for cancelling the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&mut self) -> BacktestResult {
        self.run_with_observer(|_| {})
    }

    /// Run the backtest, invoking `observer` with a progress snapshot after
    /// each simulated day.
    pub fn run_with_observer(
        &mut self,
        mut observer: impl FnMut(&EngineProgress),
    ) -> BacktestResult {
        let days: Vec<NaiveDate> = trading_days(self.config.start_date, self.config.end_date);
        let total_days = days.len();
        info!(
            start = %self.config.start_date,
            end = %self.config.end_date,
            symbols = self.config.symbols.len(),
            total_days,
            "starting backtest"
        );

        let mut cancelled = false;
        let mut days_processed = 0usize;
        let mut last_processed: Option<NaiveDate> = None;

        for date in days {
            if self.cancel.is_cancelled() {
                warn!(%date, "backtest cancelled");
                cancelled = true;
                break;
            }
            self.process_day(date);
            days_processed += 1;
            last_processed = Some(date);

            observer(&EngineProgress {
                date,
                days_processed,
                total_days,
                equity: self.equity,
                open_positions: self.ledger.open_count(),
                closed_positions: self.ledger.closed_positions().count(),
            });
        }

        // A cancelled run closes at the last day it actually simulated;
        // data past that point was never fetched and stays untouched.
        let close_date = if cancelled {
            last_processed
        } else {
            Some(self.config.end_date)
        };
        if let Some(date) = close_date {
            self.force_close_remaining(date);
        }
        self.build_result(days_processed, cancelled)
    }

    fn process_day(&mut self, date: NaiveDate) {
        // Fresh risk budget every morning.
        let mut day_risk_used = Decimal::ZERO;

        // Fetch phase: parallel, order-independent.
        let mut snapshots: Vec<(String, Result<MarketSnapshot, DataError>)> = self
            .config
            .symbols
            .par_iter()
            .map(|symbol| (symbol.clone(), self.gateway.snapshot(symbol, date)))
            .collect();
        // Decide phase: strict lexicographic order for determinism.
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut today: HashMap<String, MarketSnapshot> = HashMap::new();
        for (symbol, result) in snapshots {
            match result {
                Ok(snapshot) => {
                    self.consider_entry(&symbol, date, &snapshot, &mut day_risk_used);
                    today.insert(symbol, snapshot);
                }
                Err(e) => {
                    debug!(symbol, %date, error = %e, "no snapshot");
                    self.rejections.data_unavailable += 1;
                }
            }
        }

        // Exit pass over positions opened on prior days.
        let marks = self.mark_open_positions(date, &today);
        let report =
            self.ledger
                .manage_day(date, &marks, &self.config.exit_rules, self.sink.as_ref());
        self.cash += report.realized;
        self.equity = self.cash + report.unrealized;

        let prev_equity = self
            .equity_curve
            .last()
            .map(|e| e.equity)
            .unwrap_or(self.config.initial_capital);
        self.equity_curve.push(EquityPoint {
            date,
            equity: self.equity,
            cash: self.cash,
            unrealized: report.unrealized,
            open_positions: self.ledger.open_count(),
            daily_pnl: self.equity - prev_equity,
        });
    }

    /// Screen one symbol and open a position if everything passes.
    fn consider_entry(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        snapshot: &MarketSnapshot,
        day_risk_used: &mut Decimal,
    ) {
        if !snapshot.is_valid() {
            self.rejections.invalid_snapshot += 1;
            return;
        }
        if self.ledger.has_open(symbol) {
            self.rejections.already_open += 1;
            return;
        }
        if snapshot.percent_change.abs() < self.config.min_price_move {
            self.rejections.price_move_too_small += 1;
            return;
        }
        if snapshot.iv_rank < self.config.min_iv_rank {
            self.rejections.iv_rank_too_low += 1;
            return;
        }

        self.sink.record(ActivityEvent::VolatilityDetected {
            symbol: symbol.to_string(),
            date,
            percent_change: snapshot.percent_change,
            iv_rank: snapshot.iv_rank,
        });

        // Directional gate: sell puts only in an uptrend, calls only in a
        // downtrend. No trend, no trade.
        let allowed = if snapshot.close > snapshot.sma_20 && snapshot.rsi_14 > 50.0 {
            SpreadType::PutCredit
        } else if snapshot.close < snapshot.sma_20 && snapshot.rsi_14 < 50.0 {
            SpreadType::CallCredit
        } else {
            self.rejections.trend_gate_failed += 1;
            self.reject(symbol, date, "no tradable trend");
            return;
        };

        let context = AnalysisContext {
            open_positions: self.ledger.open_count(),
            day_risk_remaining: self.config.initial_capital * self.config.sizer.day_risk_cap
                - *day_risk_used,
        };
        self.rate_limiter.acquire();
        self.sink.record(ActivityEvent::AnalysisSent {
            symbol: symbol.to_string(),
            date,
        });
        let rec = match self.oracle.analyze(snapshot, &context) {
            Ok(rec) => rec,
            Err(e) => {
                warn!(symbol, %date, error = %e, "oracle failed");
                self.rejections.oracle_failed += 1;
                return;
            }
        };

        if !rec.should_trade {
            self.rejections.oracle_declined += 1;
            self.reject(symbol, date, &rec.rationale);
            return;
        }
        if rec.spread_type != allowed {
            self.rejections.direction_mismatch += 1;
            self.reject(symbol, date, "recommendation against the trend");
            return;
        }
        if rec.confidence < self.config.confidence_threshold {
            self.rejections.below_confidence_floor += 1;
            self.reject(symbol, date, "confidence below floor");
            return;
        }

        let book = if rec.expiration_days <= self.config.income_pop_dte_max {
            BookType::IncomePop
        } else {
            BookType::Primary
        };
        let (dte_min, dte_max) = match book {
            BookType::Primary => (self.config.primary_dte_min, self.config.primary_dte_max),
            BookType::IncomePop => (
                rec.expiration_days.max(1),
                self.config.income_pop_dte_max,
            ),
        };
        let chain = self.gateway.option_chain(symbol, date, dte_min, dte_max).ok();
        let dte = chain.as_ref().map_or_else(
            || rec.expiration_days.clamp(dte_min, dte_max),
            |c| c.dte,
        );
        let vol = snapshot.implied_volatility();

        let selection = match self.selector.select_spread_strikes(
            symbol,
            snapshot.close,
            dte,
            vol,
            rec.spread_type,
            rec.target_delta,
            chain.as_ref(),
        ) {
            Ok(sel) => sel,
            Err(e) => {
                debug!(symbol, %date, error = %e, "strike selection failed");
                self.rejections.pricing_failed += 1;
                return;
            }
        };
        if selection.net_credit <= Decimal::ZERO {
            self.rejections.non_positive_credit += 1;
            self.reject(symbol, date, "no net credit at target strikes");
            return;
        }

        let width = (selection.short_strike - selection.long_strike).abs();
        let max_loss_per_contract =
            width * Decimal::from(100) - selection.net_credit * Decimal::from(100);
        let sizing = self.sizer.size(
            self.equity,
            rec.confidence,
            book,
            snapshot.iv_rank,
            max_loss_per_contract,
            *day_risk_used,
        );
        if sizing.contracts == 0 {
            self.rejections.sizing_rejected += 1;
            let reason = sizing
                .rejection
                .map(|r| format!("{r:?}"))
                .unwrap_or_else(|| "sizing produced zero contracts".to_string());
            self.reject(symbol, date, &reason);
            return;
        }
        *day_risk_used += sizing.risk_amount;

        let expiration = date + ChronoDuration::days(dte as i64);
        let position = SpreadPositionBuilder::new(symbol, rec.spread_type, date)
            .book(book)
            .strikes(selection.short_strike, selection.long_strike)
            .credit(selection.net_credit)
            .expiration(expiration, dte)
            .market(snapshot.close, vol, selection.short_delta)
            .confidence(rec.confidence)
            .contracts(sizing.contracts)
            .build();
        self.ledger.open(position, self.sink.as_ref());
    }

    /// Today's cost-to-close for every open position with data.
    fn mark_open_positions(
        &self,
        date: NaiveDate,
        today: &HashMap<String, MarketSnapshot>,
    ) -> HashMap<u64, Decimal> {
        let mut marks = HashMap::new();
        for pos in self.ledger.open_positions() {
            let Some(snapshot) = today.get(&pos.symbol) else {
                continue;
            };
            let dte = pos.current_dte(date);
            let chain = if dte > 0 {
                self.gateway.option_chain(&pos.symbol, date, dte, dte).ok()
            } else {
                None
            };
            if let Some(cost) =
                mark_exit_cost(&self.pricer, pos, snapshot.close, date, chain.as_ref())
            {
                marks.insert(pos.id, cost);
            }
        }
        marks
    }

    /// Close whatever is still open, marking at the given date. Symbols
    /// without data on that date close at entry spot.
    fn force_close_remaining(&mut self, date: NaiveDate) {
        let mut marks = HashMap::new();
        for pos in self.ledger.open_positions() {
            let spot = self
                .gateway
                .snapshot(&pos.symbol, date)
                .map(|s| s.close)
                .unwrap_or(pos.entry_spot);
            if let Some(cost) = mark_exit_cost(&self.pricer, pos, spot, date, None) {
                marks.insert(pos.id, cost);
            }
        }
        let realized = self.ledger.force_close_all(date, &marks, self.sink.as_ref());
        self.cash += realized;
        self.equity = self.cash;
    }

    fn reject(&self, symbol: &str, date: NaiveDate, reason: &str) {
        self.sink.record(ActivityEvent::Rejected {
            symbol: symbol.to_string(),
            date,
            reason: reason.to_string(),
        });
    }

    fn build_result(&self, days_processed: usize, cancelled: bool) -> BacktestResult {
        let closed: Vec<&Position> = self.ledger.closed_positions().collect();
        let equity_values: Vec<Decimal> =
            self.equity_curve.iter().map(|e| e.equity).collect();
        let summary = metrics::summarize(&closed, &equity_values);

        BacktestResult {
            start_date: self.config.start_date,
            end_date: self.config.end_date,
            initial_capital: self.config.initial_capital,
            final_equity: self.equity,
            total_pnl: self.equity - self.config.initial_capital,
            trading_days: days_processed,
            positions: self.ledger.all_positions().to_vec(),
            equity_curve: self.equity_curve.clone(),
            rejections: self.rejections,
            summary,
            cancelled,
        }
    }
}

/// Weekdays in the window, inclusive. No holiday calendar.
fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut date = start;
    while date <= end {
        if date.weekday().num_days_from_monday() < 5 {
            days.push(date);
        }
        date += ChronoDuration::days(1);
    }
    days
}
