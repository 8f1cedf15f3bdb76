pub mod gateway;
pub mod types;

pub use gateway::{DataError, MarketDataGateway, SyntheticGateway};
pub use types::{
    BookType, MarketSnapshot, OptionChain, OptionQuote, OptionType, SpreadType,
    TradeRecommendation,
};
