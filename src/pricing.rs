//! Static (provider, model) → per-million-token rate table.
//!
//! Rates ship as embedded defaults and can be replaced wholesale from a TOML
//! file at startup. Unknown models take the documented fallback rates and the
//! span is marked cost-uncertain; pricing is pluggable, not authoritative.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Provider;

/// Fallback (input, output) rates per million tokens for unknown models
pub const FALLBACK_RATES: Rates = Rates {
    input_per_m: 1.0,
    output_per_m: 2.0,
};

/// Per-million-token pricing for one model
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rates {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl Rates {
    /// Cost in USD for a (prompt, completion) token pair
    pub fn cost(&self, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        (prompt_tokens.max(0) as f64 / 1e6) * self.input_per_m
            + (completion_tokens.max(0) as f64 / 1e6) * self.output_per_m
    }
}

#[derive(Debug, Deserialize)]
struct PricingFile {
    #[serde(default, rename = "model")]
    models: Vec<PricingEntry>,
}

#[derive(Debug, Deserialize)]
struct PricingEntry {
    provider: Provider,
    model: String,
    input_per_m: f64,
    output_per_m: f64,
}

/// Lookup table keyed by (provider, model)
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<(Provider, String), Rates>,
}

impl PricingTable {
    /// Table of embedded default rates
    pub fn with_defaults() -> Self {
        let mut rates = HashMap::new();
        for (provider, model, input, output) in DEFAULT_RATES {
            rates.insert(
                (*provider, model.to_string()),
                Rates {
                    input_per_m: *input,
                    output_per_m: *output,
                },
            );
        }
        Self { rates }
    }

    /// Load the table from a TOML file, replacing the defaults entirely
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: PricingFile = toml::from_str(&raw)
            .map_err(|e| AppError::Configuration(format!("pricing table: {}", e)))?;

        if file.models.is_empty() {
            return Err(AppError::Configuration(
                "pricing table file contains no models".to_string(),
            ));
        }

        let mut rates = HashMap::new();
        for entry in file.models {
            rates.insert(
                (entry.provider, entry.model),
                Rates {
                    input_per_m: entry.input_per_m,
                    output_per_m: entry.output_per_m,
                },
            );
        }
        Ok(Self { rates })
    }

    /// Exact (provider, model) lookup; None means the fallback path applies
    pub fn lookup(&self, provider: Provider, model: &str) -> Option<Rates> {
        self.rates.get(&(provider, model.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Embedded defaults: (provider, model, input $/M, output $/M)
const DEFAULT_RATES: &[(Provider, &str, f64, f64)] = &[
    (Provider::Openai, "gpt-4", 30.0, 60.0),
    (Provider::Openai, "gpt-4-turbo", 10.0, 30.0),
    (Provider::Openai, "gpt-4o", 2.5, 10.0),
    (Provider::Openai, "gpt-4o-mini", 0.15, 0.6),
    (Provider::Openai, "gpt-3.5-turbo", 0.5, 1.5),
    (Provider::Anthropic, "claude-3-opus", 15.0, 75.0),
    (Provider::Anthropic, "claude-3-sonnet", 3.0, 15.0),
    (Provider::Anthropic, "claude-3-haiku", 0.25, 1.25),
    (Provider::Anthropic, "claude-3-5-sonnet", 3.0, 15.0),
    (Provider::Cohere, "command-r", 0.5, 1.5),
    (Provider::Cohere, "command-r-plus", 3.0, 15.0),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_gpt4_cost() {
        let table = PricingTable::with_defaults();
        let rates = table.lookup(Provider::Openai, "gpt-4").unwrap();

        // 100 prompt + 50 completion at 30/60 per M
        let cost = rates.cost(100, 50);
        assert!((cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_misses() {
        let table = PricingTable::with_defaults();
        assert!(table.lookup(Provider::Other, "mystery-lm").is_none());

        let fallback_cost = FALLBACK_RATES.cost(1_000_000, 1_000_000);
        assert!((fallback_cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_tokens_clamped() {
        assert_eq!(FALLBACK_RATES.cost(-5, -5), 0.0);
    }

    #[test]
    fn test_reload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[model]]
provider = "openai"
model = "gpt-4"
input_per_m = 1.0
output_per_m = 1.0
"#
        )
        .unwrap();

        let table = PricingTable::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 1);

        let rates = table.lookup(Provider::Openai, "gpt-4").unwrap();
        assert!((rates.cost(500_000, 500_000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(PricingTable::from_file(file.path()).is_err());
    }
}
