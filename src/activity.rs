//! Fire-and-forget activity feed.
//!
//! The engine narrates what it does through an [`ActivitySink`]. Sinks are
//! side channels for observability: recording must never fail the backtest,
//! so implementations swallow their own errors.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::ExitReason;

/// One engine activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// A symbol cleared the volatility filters and entered analysis.
    VolatilityDetected {
        symbol: String,
        date: NaiveDate,
        percent_change: f64,
        iv_rank: f64,
    },
    /// A snapshot was sent to the decision oracle.
    AnalysisSent { symbol: String, date: NaiveDate },
    TradeOpened {
        symbol: String,
        date: NaiveDate,
        contracts: u32,
        credit: Decimal,
        confidence: u8,
    },
    TradeClosed {
        symbol: String,
        date: NaiveDate,
        contracts: u32,
        reason: ExitReason,
        pnl: Decimal,
    },
    /// A candidate was dropped with the stated reason.
    Rejected {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },
}

/// Write-only activity consumer.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}

/// Buffers events in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<ActivityEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivitySink for MemorySink {
    fn record(&self, event: ActivityEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_memory_sink_buffers_events() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        sink.record(ActivityEvent::VolatilityDetected {
            symbol: "SPY".to_string(),
            date,
            percent_change: -2.5,
            iv_rank: 82.0,
        });
        sink.record(ActivityEvent::TradeOpened {
            symbol: "SPY".to_string(),
            date,
            contracts: 8,
            credit: dec!(1.50),
            confidence: 85,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ActivityEvent::VolatilityDetected { iv_rank, .. } if iv_rank == 82.0
        ));
    }

    #[test]
    fn test_null_sink_discards() {
        // Compiles against the trait object surface the engine uses.
        let sink: Box<dyn ActivitySink> = Box::new(NullSink);
        sink.record(ActivityEvent::AnalysisSent {
            symbol: "QQQ".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        });
    }
}
