//! # Models
//!
//! Model identifiers used for agent invocations and their token pricing.
//!
//! Pricing is expressed in USD per million tokens and feeds the
//! [`CostCalculator`](crate::cost::CostCalculator).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported Claude models
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum ClaudeModel {
    #[serde(rename = "claude-4-opus")]
    Claude4Opus,
    #[default]
    #[serde(rename = "claude-4-sonnet")]
    Claude4Sonnet,
    #[serde(rename = "claude-3.5-sonnet")]
    Claude35Sonnet,
    #[serde(rename = "claude-3.5-haiku")]
    Claude35Haiku,
    #[serde(rename = "claude-3-opus")]
    Claude3Opus,
    #[serde(rename = "claude-3-sonnet")]
    Claude3Sonnet,
    #[serde(rename = "claude-3-haiku")]
    Claude3Haiku,
}

/// Price per million tokens, in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Cost of `tokens` input tokens
    pub fn input_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1_000_000.0 * self.input_per_million
    }

    /// Cost of `tokens` output tokens
    pub fn output_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1_000_000.0 * self.output_per_million
    }
}

impl ClaudeModel {
    /// Get all known models
    pub fn all() -> Vec<ClaudeModel> {
        vec![
            ClaudeModel::Claude4Opus,
            ClaudeModel::Claude4Sonnet,
            ClaudeModel::Claude35Sonnet,
            ClaudeModel::Claude35Haiku,
            ClaudeModel::Claude3Opus,
            ClaudeModel::Claude3Sonnet,
            ClaudeModel::Claude3Haiku,
        ]
    }

    /// Short key used in config files and reports
    pub fn key(&self) -> &'static str {
        match self {
            ClaudeModel::Claude4Opus => "claude-4-opus",
            ClaudeModel::Claude4Sonnet => "claude-4-sonnet",
            ClaudeModel::Claude35Sonnet => "claude-3.5-sonnet",
            ClaudeModel::Claude35Haiku => "claude-3.5-haiku",
            ClaudeModel::Claude3Opus => "claude-3-opus",
            ClaudeModel::Claude3Sonnet => "claude-3-sonnet",
            ClaudeModel::Claude3Haiku => "claude-3-haiku",
        }
    }

    /// Versioned model id passed to the agent backend
    pub fn api_id(&self) -> &'static str {
        match self {
            ClaudeModel::Claude4Opus => "claude-opus-4-20250514",
            ClaudeModel::Claude4Sonnet => "claude-sonnet-4-20250514",
            ClaudeModel::Claude35Sonnet => "claude-3-5-sonnet-20241022",
            ClaudeModel::Claude35Haiku => "claude-3-5-haiku-20241022",
            ClaudeModel::Claude3Opus => "claude-3-opus-20240229",
            ClaudeModel::Claude3Sonnet => "claude-3-sonnet-20240229",
            ClaudeModel::Claude3Haiku => "claude-3-haiku-20240307",
        }
    }

    pub fn pricing(&self) -> ModelPricing {
        match self {
            ClaudeModel::Claude4Opus | ClaudeModel::Claude3Opus => ModelPricing::new(15.0, 75.0),
            ClaudeModel::Claude4Sonnet
            | ClaudeModel::Claude35Sonnet
            | ClaudeModel::Claude3Sonnet => ModelPricing::new(3.0, 15.0),
            ClaudeModel::Claude35Haiku => ModelPricing::new(0.8, 4.0),
            ClaudeModel::Claude3Haiku => ModelPricing::new(0.25, 1.25),
        }
    }
}

impl fmt::Display for ClaudeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ClaudeModel {
    type Err = String;

    /// Accepts either the short key or the versioned api id
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ClaudeModel::all()
            .into_iter()
            .find(|m| m.key() == needle || m.api_id() == needle)
            .ok_or_else(|| {
                let known: Vec<_> = ClaudeModel::all().iter().map(|m| m.key()).collect();
                format!("Unknown model '{}' (known: {})", s, known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model() {
        assert_eq!(ClaudeModel::default(), ClaudeModel::Claude4Sonnet);
        assert_eq!(ClaudeModel::default().pricing(), ModelPricing::new(3.0, 15.0));
    }

    #[test]
    fn test_parse_model() {
        assert_eq!(
            "claude-3.5-haiku".parse::<ClaudeModel>(),
            Ok(ClaudeModel::Claude35Haiku)
        );
        assert_eq!(
            "claude-opus-4-20250514".parse::<ClaudeModel>(),
            Ok(ClaudeModel::Claude4Opus)
        );
        assert!("gpt-4o".parse::<ClaudeModel>().is_err());
    }

    #[test]
    fn test_serde_uses_key() {
        let json = serde_json::to_string(&ClaudeModel::Claude3Haiku).unwrap();
        assert_eq!(json, "\"claude-3-haiku\"");
        for model in ClaudeModel::all() {
            let json = serde_json::to_string(&model).unwrap();
            assert_eq!(json, format!("\"{}\"", model.key()));
        }
    }

    #[test]
    fn test_pricing_math() {
        let pricing = ClaudeModel::Claude4Opus.pricing();
        assert!((pricing.input_cost(1_000_000) - 15.0).abs() < 1e-9);
        assert!((pricing.output_cost(500_000) - 37.5).abs() < 1e-9);
    }
}
