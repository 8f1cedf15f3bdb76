//! Confidence-tiered position sizing with a daily risk budget.
//!
//! Sizing never errors: a trade that cannot be sized comes back as zero
//! contracts with an explicit rejection reason, and the engine counts it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::data::BookType;

/// Optional IV-rank sizing boost. When the day's IV rank clears the
/// threshold, the tier percentage is multiplied and re-capped at the top
/// tier ceiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IvBoost {
    pub iv_rank_threshold: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Confidence floor for the primary book.
    pub confidence_threshold: u8,
    /// Hard cap on total new risk opened in a single day, as a fraction
    /// of equity.
    pub day_risk_cap: Decimal,
    /// Flat risk fraction for the income-pop book.
    pub income_pop_risk: Decimal,
    pub iv_boost: Option<IvBoost>,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 70,
            day_risk_cap: dec!(0.10),
            income_pop_risk: dec!(0.01),
            iv_boost: None,
        }
    }
}

/// Why a sizing request produced zero contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingRejection {
    BelowConfidenceFloor,
    DayRiskExceeded,
    BudgetTooSmall,
    InvalidMaxLoss,
}

/// Confidence tier the request landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    /// Confidence 70-79: 3% of equity.
    Standard,
    /// Confidence 80-89: 5% of equity.
    Elevated,
    /// Confidence 90-100: 8% of equity.
    Maximum,
    /// Income-pop book: flat 1%.
    IncomePop,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard_3pct",
            Self::Elevated => "elevated_5pct",
            Self::Maximum => "maximum_8pct",
            Self::IncomePop => "income_pop_1pct",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingResult {
    pub contracts: u32,
    /// Dollar risk actually committed: contracts x max loss per contract.
    pub risk_amount: Decimal,
    /// Tier risk fraction the request was budgeted at.
    pub risk_pct: Decimal,
    pub tier: Option<ConfidenceTier>,
    pub rejection: Option<SizingRejection>,
}

impl SizingResult {
    fn rejected(reason: SizingRejection) -> Self {
        Self {
            contracts: 0,
            risk_amount: Decimal::ZERO,
            risk_pct: Decimal::ZERO,
            tier: None,
            rejection: Some(reason),
        }
    }
}

const TOP_TIER_PCT: Decimal = dec!(0.08);

pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    fn tier_for(&self, confidence: u8) -> Option<(ConfidenceTier, Decimal)> {
        match confidence {
            90..=100 => Some((ConfidenceTier::Maximum, dec!(0.08))),
            80..=89 => Some((ConfidenceTier::Elevated, dec!(0.05))),
            70..=79 => Some((ConfidenceTier::Standard, dec!(0.03))),
            _ => None,
        }
    }

    /// Size a new spread position.
    ///
    /// `day_risk_used` is the dollar risk already committed today. The
    /// day cap is all-or-nothing: if the tier's full budget does not fit
    /// under the remaining headroom, the trade is rejected rather than
    /// scaled down.
    pub fn size(
        &self,
        equity: Decimal,
        confidence: u8,
        book: BookType,
        iv_rank: f64,
        max_loss_per_contract: Decimal,
        day_risk_used: Decimal,
    ) -> SizingResult {
        if max_loss_per_contract <= Decimal::ZERO {
            return SizingResult::rejected(SizingRejection::InvalidMaxLoss);
        }

        let (tier, mut risk_pct) = match book {
            BookType::IncomePop => (ConfidenceTier::IncomePop, self.config.income_pop_risk),
            BookType::Primary => match self.tier_for(confidence) {
                Some(t) if confidence >= self.config.confidence_threshold => t,
                _ => return SizingResult::rejected(SizingRejection::BelowConfidenceFloor),
            },
        };

        if book == BookType::Primary {
            if let Some(boost) = self.config.iv_boost {
                if iv_rank >= boost.iv_rank_threshold {
                    let mult = Decimal::try_from(boost.multiplier.clamp(1.0, 2.0))
                        .unwrap_or(Decimal::ONE);
                    risk_pct = (risk_pct * mult).min(TOP_TIER_PCT);
                }
            }
        }

        let budget = equity * risk_pct;
        let day_cap = equity * self.config.day_risk_cap;
        if day_risk_used + budget > day_cap {
            return SizingResult::rejected(SizingRejection::DayRiskExceeded);
        }

        let contracts = (budget / max_loss_per_contract)
            .floor()
            .try_into()
            .unwrap_or(0u32);
        if contracts == 0 {
            return SizingResult::rejected(SizingRejection::BudgetTooSmall);
        }

        SizingResult {
            contracts,
            risk_amount: Decimal::from(contracts) * max_loss_per_contract,
            risk_pct,
            tier: Some(tier),
            rejection: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(SizerConfig::default())
    }

    // $350 max loss per contract: $5 width, $1.50 credit.
    const MAX_LOSS: Decimal = dec!(350);

    #[test]
    fn test_confidence_tiers() {
        let s = sizer();
        let equity = dec!(100_000);

        // 3% of 100k = 3000 / 350 -> 8 contracts.
        let r = s.size(equity, 75, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.contracts, 8);
        assert_eq!(r.tier, Some(ConfidenceTier::Standard));

        // 5% -> 5000 / 350 -> 14.
        let r = s.size(equity, 85, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.contracts, 14);
        assert_eq!(r.tier, Some(ConfidenceTier::Elevated));

        // 8% -> 8000 / 350 -> 22.
        let r = s.size(equity, 95, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.contracts, 22);
        assert_eq!(r.tier, Some(ConfidenceTier::Maximum));
    }

    #[test]
    fn test_tier_boundaries() {
        let s = sizer();
        let equity = dec!(100_000);
        let pct = |confidence| {
            s.size(equity, confidence, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO)
                .risk_pct
        };
        assert_eq!(pct(70), dec!(0.03));
        assert_eq!(pct(79), dec!(0.03));
        assert_eq!(pct(80), dec!(0.05));
        assert_eq!(pct(89), dec!(0.05));
        assert_eq!(pct(90), dec!(0.08));
        assert_eq!(pct(100), dec!(0.08));
    }

    #[test]
    fn test_below_floor_rejected() {
        let s = sizer();
        let r = s.size(dec!(100_000), 69, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.contracts, 0);
        assert_eq!(r.rejection, Some(SizingRejection::BelowConfidenceFloor));
    }

    #[test]
    fn test_contracts_monotonic_in_confidence() {
        let s = sizer();
        let equity = dec!(100_000);
        let mut prev = 0;
        for confidence in 70..=100 {
            let r = s.size(equity, confidence, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
            assert!(r.contracts >= prev);
            prev = r.contracts;
        }
    }

    #[test]
    fn test_income_pop_flat_one_percent() {
        let s = sizer();
        // 1% of 100k = 1000 / 350 -> 2 contracts, confidence irrelevant.
        let r = s.size(dec!(100_000), 55, BookType::IncomePop, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.contracts, 2);
        assert_eq!(r.tier, Some(ConfidenceTier::IncomePop));
    }

    #[test]
    fn test_day_risk_gate_all_or_nothing() {
        let s = sizer();
        let equity = dec!(100_000);

        // Cap is 10k. 8k already used; a 5% (5k) request must be rejected
        // outright, not scaled to the remaining 2k.
        let r = s.size(equity, 85, BookType::Primary, 50.0, MAX_LOSS, dec!(8_000));
        assert_eq!(r.contracts, 0);
        assert_eq!(r.rejection, Some(SizingRejection::DayRiskExceeded));

        // 5k used: another 5k fits exactly.
        let r = s.size(equity, 85, BookType::Primary, 50.0, MAX_LOSS, dec!(5_000));
        assert_eq!(r.contracts, 14);
        assert!(r.rejection.is_none());
    }

    #[test]
    fn test_zero_contracts_never_rounded_up() {
        let s = sizer();
        // 3% of 10k = 300; max loss 350 -> floor gives 0, stays 0.
        let r = s.size(dec!(10_000), 75, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.contracts, 0);
        assert_eq!(r.rejection, Some(SizingRejection::BudgetTooSmall));
    }

    #[test]
    fn test_invalid_max_loss() {
        let s = sizer();
        let r = s.size(dec!(100_000), 85, BookType::Primary, 50.0, Decimal::ZERO, Decimal::ZERO);
        assert_eq!(r.rejection, Some(SizingRejection::InvalidMaxLoss));
    }

    #[test]
    fn test_iv_boost_capped_at_top_tier() {
        let config = SizerConfig {
            iv_boost: Some(IvBoost {
                iv_rank_threshold: 80.0,
                multiplier: 2.0,
            }),
            ..SizerConfig::default()
        };
        let s = PositionSizer::new(config);
        let equity = dec!(100_000);

        // 3% doubled -> 6%.
        let r = s.size(equity, 75, BookType::Primary, 85.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.risk_pct, dec!(0.06));

        // 5% doubled would be 10%, capped at 8%.
        let r = s.size(equity, 85, BookType::Primary, 85.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.risk_pct, dec!(0.08));

        // Below the IV threshold the boost never applies.
        let r = s.size(equity, 85, BookType::Primary, 60.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.risk_pct, dec!(0.05));
    }

    #[test]
    fn test_committed_risk_is_contract_multiple() {
        let s = sizer();
        let r = s.size(dec!(100_000), 75, BookType::Primary, 50.0, MAX_LOSS, Decimal::ZERO);
        assert_eq!(r.risk_amount, Decimal::from(r.contracts) * MAX_LOSS);
        assert!(r.risk_amount <= dec!(3_000));
    }
}
