pub mod activity;
pub mod data;
pub mod engine;
pub mod ledger;
pub mod metrics;
pub mod oracle;
pub mod pricing;
pub mod risk;

// Re-export commonly used types
pub use activity::{ActivityEvent, ActivitySink, MemorySink, NullSink};
pub use data::{
    BookType, MarketDataGateway, MarketSnapshot, OptionChain, OptionQuote, OptionType,
    SpreadType, SyntheticGateway, TradeRecommendation,
};
pub use engine::{
    BacktestConfig, BacktestEngine, BacktestResult, CancelToken, ConfigError, EngineProgress,
    EquityPoint, RejectionCounts,
};
pub use ledger::{ExitReason, ExitRules, Position, PositionStatus, TradeLedger};
pub use metrics::PerformanceSummary;
pub use oracle::{AnalysisContext, DecisionOracle, OracleError, RateLimiter, RuleOracle};
pub use pricing::{BlackScholes, PricerError, StrikeSelector};
pub use risk::{PositionSizer, SizerConfig, SizingResult};
