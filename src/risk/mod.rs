pub mod position_sizer;

pub use position_sizer::{
    ConfidenceTier, IvBoost, PositionSizer, SizerConfig, SizingRejection, SizingResult,
};
