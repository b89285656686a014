//! Label table and product catalog.
//!
//! Both are read-only after startup: the label table maps a category index to a
//! product name, the catalog maps a product name to its unit price.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::Path;

/// Price used when a product is missing from the catalog.
pub const DEFAULT_UNIT_PRICE: f64 = 10.0;

/// Category index → product name. One label per line; line number is the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn from_lines(text: &str) -> Self {
        Self {
            labels: text.lines().map(|line| line.trim().to_string()).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read labels file {}: {}", path.display(), e))?;
        let table = Self::from_lines(&raw);
        log::info!("loaded {} labels from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn name(&self, category: u32) -> Option<&str> {
        self.labels.get(category as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Product name → unit price.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductCatalog {
    prices: HashMap<String, f64>,
    default_price: f64,
}

impl ProductCatalog {
    pub fn new(prices: HashMap<String, f64>, default_price: f64) -> Self {
        Self {
            prices,
            default_price,
        }
    }

    /// Parse a JSON object of `{"name": price}` pairs.
    pub fn from_json(raw: &str, default_price: f64) -> Result<Self> {
        let prices: HashMap<String, f64> =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid product catalog: {}", e))?;
        if let Some((name, price)) = prices.iter().find(|(_, p)| !p.is_finite() || **p < 0.0) {
            return Err(anyhow!("product '{}' has invalid price {}", name, price));
        }
        Ok(Self::new(prices, default_price))
    }

    pub fn load(path: &Path, default_price: f64) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read product catalog {}: {}", path.display(), e))?;
        let catalog = Self::from_json(&raw, default_price)
            .map_err(|e| anyhow!("{}: {}", path.display(), e))?;
        log::info!(
            "loaded {} products from {}",
            catalog.prices.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Unit price for `name`, or the default price for unknown products.
    pub fn price(&self, name: &str) -> f64 {
        self.prices.get(name).copied().unwrap_or(self.default_price)
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::new(HashMap::new(), DEFAULT_UNIT_PRICE)
    }
}
