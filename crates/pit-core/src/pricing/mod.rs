//! Token cost model.
//!
//! Costs flow through three units:
//!
//! ```text
//! tokens --(model price, margin)--> GBP --(credit value)--> micro-credits
//! ```
//!
//! GBP amounts are `f64` only inside this module. Anything that reaches the
//! ledger has been rounded **up** to whole micro-credits by
//! [`PricingConfig::to_micro_credits`], so a hold never undershoots the
//! priced cost.
//!
//! BYOK bouts run on the user's own provider key; they pay a flat platform
//! fee per 1K tokens with a floor instead of a model price.

// Token counts stay far below 2^52 so the f64 conversions are exact.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::MICRO_PER_CREDIT;

/// Model id that selects the BYOK fee schedule.
pub const BYOK_MODEL_ID: &str = "byok";

/// Tolerance for snapping float quotients to the integer they represent.
const ROUNDING_EPSILON: f64 = 1e-9;

/// Errors raised while pricing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PricingError {
    /// No price is configured for the model.
    #[error("no price configured for model '{0}'")]
    UnknownModel(String),
}

/// Price of one model in GBP per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Input price.
    pub input_gbp_per_mtok: f64,
    /// Output price.
    pub output_gbp_per_mtok: f64,
}

impl ModelPrice {
    /// Creates a price.
    #[must_use]
    pub const fn new(input_gbp_per_mtok: f64, output_gbp_per_mtok: f64) -> Self {
        Self {
            input_gbp_per_mtok,
            output_gbp_per_mtok,
        }
    }
}

/// Token counts for one bout or one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Pricing parameters, the `[pricing]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// GBP value of one credit.
    pub credit_value_gbp: f64,

    /// Margin added on top of model cost, `0.10` for 10%.
    pub platform_margin: f64,

    /// Characters per token when estimating from text.
    pub token_chars_per: u32,

    /// Default completion tokens per turn for estimates.
    pub output_tokens_per_turn: u32,

    /// Prompt tokens per completion token for estimates.
    pub input_factor: f64,

    /// BYOK platform fee per 1K tokens.
    pub byok_fee_gbp_per_1k_tokens: f64,

    /// Minimum BYOK charge per bout.
    pub byok_min_gbp: f64,

    /// Per-model prices keyed by model id.
    pub models: BTreeMap<String, ModelPrice>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let models = [
            ("claude-haiku-4-5-20251001", ModelPrice::new(0.732, 3.66)),
            ("claude-sonnet-4-5-20250929", ModelPrice::new(2.196, 10.98)),
            ("claude-opus-4-5-20251101", ModelPrice::new(3.66, 18.3)),
            ("claude-opus-4-6", ModelPrice::new(3.66, 18.3)),
        ]
        .into_iter()
        .map(|(id, price)| (id.to_string(), price))
        .collect();

        Self {
            credit_value_gbp: 0.01,
            platform_margin: 0.10,
            token_chars_per: 4,
            output_tokens_per_turn: 120,
            input_factor: 5.5,
            byok_fee_gbp_per_1k_tokens: 0.0002,
            byok_min_gbp: 0.001,
            models,
        }
    }
}

impl PricingConfig {
    /// Checks the parameters.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid key.
    pub fn validate(&self) -> Result<(), String> {
        let positive = |value: f64, key: &str| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(format!("pricing.{key} must be a positive number"))
            }
        };
        let non_negative = |value: f64, key: &str| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(format!("pricing.{key} cannot be negative"))
            }
        };

        positive(self.credit_value_gbp, "credit_value_gbp")?;
        non_negative(self.platform_margin, "platform_margin")?;
        positive(self.input_factor, "input_factor")?;
        non_negative(self.byok_fee_gbp_per_1k_tokens, "byok_fee_gbp_per_1k_tokens")?;
        non_negative(self.byok_min_gbp, "byok_min_gbp")?;
        if self.token_chars_per == 0 {
            return Err("pricing.token_chars_per must be positive".to_string());
        }
        if self.output_tokens_per_turn == 0 {
            return Err("pricing.output_tokens_per_turn must be positive".to_string());
        }
        for (model, price) in &self.models {
            non_negative(price.input_gbp_per_mtok, &format!("models.{model}.input"))?;
            non_negative(price.output_gbp_per_mtok, &format!("models.{model}.output"))?;
        }
        Ok(())
    }

    /// GBP value of one micro-credit.
    #[must_use]
    pub fn micro_value_gbp(&self) -> f64 {
        self.credit_value_gbp / MICRO_PER_CREDIT as f64
    }

    /// Converts GBP to micro-credits, rounding up.
    ///
    /// Quotients within float noise of an integer snap to that integer, so
    /// exactly 0.001 GBP is 10 micro rather than 11.
    #[must_use]
    pub fn to_micro_credits(&self, gbp: f64) -> i64 {
        if !gbp.is_finite() || gbp <= 0.0 {
            return 0;
        }
        let raw = gbp / self.micro_value_gbp();
        let nearest = raw.round();
        let micro = if (raw - nearest).abs() < ROUNDING_EPSILON {
            nearest
        } else {
            raw.ceil()
        };
        micro as i64
    }

    /// Estimates tokens in `text` from its character count, at least `min`.
    #[must_use]
    pub fn estimate_tokens_from_text(&self, text: &str, min: u64) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(u64::from(self.token_chars_per.max(1))).max(min)
    }

    /// Estimates the tokens of a bout before it runs.
    ///
    /// `output_tokens_per_turn` overrides the configured default, e.g. for
    /// a longer response length.
    #[must_use]
    pub fn estimate_bout_tokens(
        &self,
        turns: u32,
        output_tokens_per_turn: Option<u32>,
    ) -> TokenUsage {
        let per_turn = output_tokens_per_turn.unwrap_or(self.output_tokens_per_turn);
        let output_tokens = (u64::from(turns) * u64::from(per_turn)).max(1);
        let input_tokens = ((output_tokens as f64 * self.input_factor).ceil() as u64).max(1);
        TokenUsage::new(input_tokens, output_tokens)
    }

    /// Prices `usage` on `model_id` in GBP, margin included.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::UnknownModel`] when the model has no price.
    pub fn compute_cost_gbp(&self, usage: TokenUsage, model_id: &str) -> Result<f64, PricingError> {
        if model_id == BYOK_MODEL_ID {
            let fee = usage.total() as f64 / 1000.0 * self.byok_fee_gbp_per_1k_tokens;
            return Ok(fee.max(self.byok_min_gbp));
        }
        let price = self
            .models
            .get(model_id)
            .ok_or_else(|| PricingError::UnknownModel(model_id.to_string()))?;
        let raw = (usage.input_tokens as f64 * price.input_gbp_per_mtok
            + usage.output_tokens as f64 * price.output_gbp_per_mtok)
            / 1_000_000.0;
        Ok(raw * (1.0 + self.platform_margin))
    }

    /// Prices `usage` on `model_id` in micro-credits, rounded up.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::UnknownModel`] when the model has no price.
    pub fn compute_cost_micro(
        &self,
        usage: TokenUsage,
        model_id: &str,
    ) -> Result<i64, PricingError> {
        Ok(self.to_micro_credits(self.compute_cost_gbp(usage, model_id)?))
    }

    /// Estimated GBP cost of a bout of `turns` turns.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::UnknownModel`] when the model has no price.
    pub fn estimate_bout_cost_gbp(
        &self,
        turns: u32,
        model_id: &str,
        output_tokens_per_turn: Option<u32>,
    ) -> Result<f64, PricingError> {
        self.compute_cost_gbp(self.estimate_bout_tokens(turns, output_tokens_per_turn), model_id)
    }

    /// Estimated micro-credit cost of a bout, the amount to preauthorize.
    ///
    /// Never below one micro-credit, since a hold must be positive. A
    /// zero-priced model still holds one micro and settles at zero.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::UnknownModel`] when the model has no price.
    pub fn estimate_bout_cost_micro(
        &self,
        turns: u32,
        model_id: &str,
        output_tokens_per_turn: Option<u32>,
    ) -> Result<i64, PricingError> {
        let gbp = self.estimate_bout_cost_gbp(turns, model_id, output_tokens_per_turn)?;
        Ok(self.to_micro_credits(gbp).max(1))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const HAIKU: &str = "claude-haiku-4-5-20251001";

    #[test]
    fn test_to_micro_credits_rounds_up() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.to_micro_credits(0.0), 0);
        assert_eq!(pricing.to_micro_credits(-1.0), 0);
        assert_eq!(pricing.to_micro_credits(0.001), 10);
        assert_eq!(pricing.to_micro_credits(0.01), 100);
        assert_eq!(pricing.to_micro_credits(0.000_101), 2);
    }

    #[test]
    fn test_estimate_bout_tokens() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.estimate_bout_tokens(2, None), TokenUsage::new(1320, 240));
        assert_eq!(pricing.estimate_bout_tokens(0, None), TokenUsage::new(6, 1));
        assert_eq!(pricing.estimate_bout_tokens(1, Some(10)), TokenUsage::new(55, 10));
    }

    #[test]
    fn test_model_cost_includes_margin() {
        let pricing = PricingConfig::default();
        // (1320 * 0.732 + 240 * 3.66) / 1e6 * 1.1 = 0.002029104 GBP
        let gbp = pricing.estimate_bout_cost_gbp(2, HAIKU, None).unwrap();
        assert!((gbp - 0.002_029_104).abs() < 1e-12);
        assert_eq!(pricing.estimate_bout_cost_micro(2, HAIKU, None).unwrap(), 21);
    }

    #[test]
    fn test_byok_fee_has_floor() {
        let pricing = PricingConfig::default();
        // 1560 tokens * 0.0002 / 1000 is below the 0.001 floor.
        assert_eq!(pricing.estimate_bout_cost_micro(2, BYOK_MODEL_ID, None).unwrap(), 10);
        // 15600 tokens: 0.00312 GBP.
        assert_eq!(pricing.estimate_bout_cost_micro(20, BYOK_MODEL_ID, None).unwrap(), 32);
    }

    #[test]
    fn test_unknown_model_is_an_error() {
        let pricing = PricingConfig::default();
        assert_eq!(
            pricing.compute_cost_micro(TokenUsage::new(10, 10), "gpt-unknown"),
            Err(PricingError::UnknownModel("gpt-unknown".into()))
        );
    }

    #[test]
    fn test_estimate_tokens_from_text() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.estimate_tokens_from_text("", 0), 0);
        assert_eq!(pricing.estimate_tokens_from_text("", 1), 1);
        assert_eq!(pricing.estimate_tokens_from_text("abcde", 0), 2);
        assert_eq!(pricing.estimate_tokens_from_text("héllo wörld", 0), 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut pricing = PricingConfig::default();
        assert!(pricing.validate().is_ok());

        pricing.credit_value_gbp = 0.0;
        assert!(pricing.validate().is_err());

        let mut pricing = PricingConfig::default();
        pricing.token_chars_per = 0;
        assert!(pricing.validate().is_err());

        let mut pricing = PricingConfig::default();
        pricing.models.insert("bad".into(), ModelPrice::new(-1.0, 1.0));
        assert!(pricing.validate().unwrap_err().contains("models.bad"));
    }

    #[test]
    fn test_free_model_estimate_is_still_a_positive_hold() {
        let mut pricing = PricingConfig::default();
        pricing.models.insert("free".into(), ModelPrice::new(0.0, 0.0));
        pricing.byok_fee_gbp_per_1k_tokens = 0.0;
        pricing.byok_min_gbp = 0.0;
        assert!(pricing.validate().is_ok());

        assert_eq!(pricing.estimate_bout_cost_micro(3, "free", None).unwrap(), 1);
        assert_eq!(pricing.estimate_bout_cost_micro(0, BYOK_MODEL_ID, None).unwrap(), 1);
        // Actual usage is not floored.
        assert_eq!(
            pricing
                .compute_cost_micro(TokenUsage::new(1000, 100), "free")
                .unwrap(),
            0
        );
    }

    proptest! {
        #[test]
        fn prop_micro_never_undershoots(gbp in 0.000_001f64..10.0) {
            let pricing = PricingConfig::default();
            let micro = pricing.to_micro_credits(gbp);
            let covered = micro as f64 * pricing.micro_value_gbp();
            prop_assert!(covered + 1e-9 >= gbp);
        }

        #[test]
        fn prop_estimate_grows_with_turns(turns in 1u32..200) {
            let pricing = PricingConfig::default();
            let shorter = pricing.estimate_bout_cost_micro(turns, HAIKU, None).unwrap();
            let longer = pricing.estimate_bout_cost_micro(turns + 1, HAIKU, None).unwrap();
            prop_assert!(longer >= shorter);
        }
    }
}
