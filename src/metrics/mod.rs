//! Performance statistics over closed trades and the equity curve.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::Position;

/// Aggregate backtest performance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winners: usize,
    pub losers: usize,
    /// Fraction of closed trades with positive P&L.
    pub win_rate: f64,
    pub total_pnl: Decimal,
    /// Gross profit / gross loss. Infinite when there are no losers.
    pub profit_factor: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_days_in_trade: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    /// Annualized Sharpe ratio of daily equity returns (252 trading days).
    pub sharpe_ratio: f64,
}

impl PerformanceSummary {
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            winners: 0,
            losers: 0,
            win_rate: 0.0,
            total_pnl: Decimal::ZERO,
            profit_factor: 0.0,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            avg_days_in_trade: 0.0,
            max_drawdown: Decimal::ZERO,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
        }
    }
}

/// Summarize closed positions against the daily equity curve.
pub fn summarize(closed: &[&Position], equity_curve: &[Decimal]) -> PerformanceSummary {
    if closed.is_empty() && equity_curve.is_empty() {
        return PerformanceSummary::empty();
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    let mut gross_profit = Decimal::ZERO;
    let mut gross_loss = Decimal::ZERO;
    let mut total_days = 0i64;

    for pos in closed {
        let pnl = pos.realized_pnl;
        if pnl > Decimal::ZERO {
            winners += 1;
            gross_profit += pnl;
        } else {
            losers += 1;
            gross_loss += -pnl;
        }
        if let Some(exit) = pos.exit_date() {
            total_days += (exit - pos.entry_date).num_days();
        }
    }

    let total_trades = closed.len();
    let win_rate = if total_trades > 0 {
        winners as f64 / total_trades as f64
    } else {
        0.0
    };
    let profit_factor = {
        let profit: f64 = gross_profit.try_into().unwrap_or(0.0);
        let loss: f64 = gross_loss.try_into().unwrap_or(0.0);
        if loss > 0.0 {
            profit / loss
        } else if profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    };
    let avg_win = if winners > 0 {
        gross_profit / Decimal::from(winners)
    } else {
        Decimal::ZERO
    };
    let avg_loss = if losers > 0 {
        gross_loss / Decimal::from(losers)
    } else {
        Decimal::ZERO
    };
    let avg_days_in_trade = if total_trades > 0 {
        total_days as f64 / total_trades as f64
    } else {
        0.0
    };

    let (max_drawdown, max_drawdown_pct) = max_drawdown(equity_curve);

    PerformanceSummary {
        total_trades,
        winners,
        losers,
        win_rate,
        total_pnl: gross_profit - gross_loss,
        profit_factor,
        avg_win,
        avg_loss,
        avg_days_in_trade,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio: sharpe_ratio(equity_curve),
    }
}

/// Largest peak-to-trough equity decline, absolute and as a fraction of
/// the peak.
pub fn max_drawdown(equity_curve: &[Decimal]) -> (Decimal, f64) {
    let mut peak = Decimal::MIN;
    let mut worst = Decimal::ZERO;
    let mut worst_pct = 0.0f64;

    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        if dd > worst {
            worst = dd;
            let peak_f: f64 = peak.try_into().unwrap_or(0.0);
            let dd_f: f64 = dd.try_into().unwrap_or(0.0);
            if peak_f > 0.0 {
                worst_pct = dd_f / peak_f;
            }
        }
    }
    (worst, worst_pct)
}

/// Annualized Sharpe ratio of daily returns, zero risk-free baseline.
pub fn sharpe_ratio(equity_curve: &[Decimal]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    let values: Vec<f64> = equity_curve
        .iter()
        .map(|&e| e.try_into().unwrap_or(0.0))
        .collect();
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev * (252.0f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SpreadType;
    use crate::ledger::{ExitReason, SpreadPositionBuilder};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn closed_position(pnl_per_contract: Decimal, days: i64) -> Position {
        let entry = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let exp = NaiveDate::from_ymd_opt(2024, 4, 15).unwrap();
        let mut pos = SpreadPositionBuilder::new("SPY", SpreadType::PutCredit, entry)
            .strikes(dec!(435), dec!(430))
            .credit(dec!(1.50))
            .expiration(exp, 45)
            .contracts(1)
            .build();
        let exit_cost = pos.entry_credit - pnl_per_contract;
        pos.apply_exit(
            entry + chrono::Duration::days(days),
            1,
            exit_cost,
            ExitReason::ProfitTarget,
        );
        pos
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let a = closed_position(dec!(100), 10);
        let b = closed_position(dec!(50), 20);
        let c = closed_position(dec!(-75), 5);
        let closed = vec![&a, &b, &c];

        let summary = summarize(&closed, &[]);
        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.winners, 2);
        assert_eq!(summary.losers, 1);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.total_pnl, dec!(75));
        assert!((summary.profit_factor - 2.0).abs() < 1e-12);
        assert_eq!(summary.avg_win, dec!(75));
        assert_eq!(summary.avg_loss, dec!(75));
        assert!((summary.avg_days_in_trade - 35.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_losers_profit_factor_infinite() {
        let a = closed_position(dec!(100), 10);
        let summary = summarize(&[&a], &[]);
        assert!(summary.profit_factor.is_infinite());
        assert_eq!(summary.win_rate, 1.0);
    }

    #[test]
    fn test_max_drawdown() {
        let curve = vec![
            dec!(100_000),
            dec!(105_000),
            dec!(98_000),
            dec!(101_000),
            dec!(94_500),
            dec!(110_000),
        ];
        let (dd, pct) = max_drawdown(&curve);
        assert_eq!(dd, dec!(10_500)); // 105k peak to 94.5k trough
        assert!((pct - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_curve_no_drawdown() {
        let curve = vec![dec!(100), dec!(110), dec!(120)];
        let (dd, pct) = max_drawdown(&curve);
        assert_eq!(dd, Decimal::ZERO);
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn test_sharpe_flat_curve_is_zero() {
        let curve = vec![dec!(100_000); 10];
        assert_eq!(sharpe_ratio(&curve), 0.0);
    }

    #[test]
    fn test_sharpe_sign_follows_trend() {
        let up: Vec<Decimal> = (0..20).map(|i| dec!(100_000) + Decimal::from(i * 100)).collect();
        // Uneven gains so the std dev is non-zero.
        let mut jittered = up.clone();
        jittered[5] += dec!(500);
        jittered[11] -= dec!(200);
        assert!(sharpe_ratio(&jittered) > 0.0);

        let down: Vec<Decimal> = (0..20).map(|i| dec!(100_000) - Decimal::from(i * 100)).collect();
        let mut jittered = down.clone();
        jittered[7] -= dec!(500);
        assert!(sharpe_ratio(&jittered) < 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let summary = summarize(&[], &[]);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.sharpe_ratio, 0.0);
    }
}
