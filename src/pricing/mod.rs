pub mod black_scholes;
pub mod strike_selector;

pub use black_scholes::{BlackScholes, OptionPrice, PricerError, SpreadPrice};
pub use strike_selector::{SelectorConfig, SpreadSelection, StrikeSelector};
