//! Supplier providers
//!
//! - [`traits`]: the `SupplierProvider` trait every supplier implements
//! - [`derive`]: store rules turning raw supplier data into a product delta
//! - [`bestbuy`]: Best Buy proxy integration
//! - [`vitacost`]: Vitacost scraper integration
//! - [`factory`]: registry selecting and caching providers per store

pub mod bestbuy;
pub mod derive;
pub mod factory;
pub mod traits;
pub mod vitacost;

use serde::{Deserialize, Serialize};

use crate::config::{HttpConfig, StoreConfig};
use crate::database::PRODUCT_COLUMNS;
use crate::error::ProviderError;

// Re-export main types
pub use bestbuy::BestBuyProvider;
pub use derive::{derive_delta, lead_time_days};
pub use factory::{ProviderConstructor, ProviderFactory};
pub use traits::{FetchOutcome, Phase2Queries, ProviderDefaults, RawSupplierData, SupplierProvider};
pub use vitacost::VitacostProvider;

#[cfg(test)]
pub use traits::MockSupplierProvider;

/// Closed set of supplier integrations shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Best Buy proxy
    BestBuy,
    /// Vitacost scraper
    Vitacost,
}

impl ProviderKind {
    /// Every built-in variant
    pub const ALL: [ProviderKind; 2] = [ProviderKind::BestBuy, ProviderKind::Vitacost];

    /// Registry id
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::BestBuy => "bestbuy",
            ProviderKind::Vitacost => "vitacost",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bestbuy" | "best_buy" => Ok(ProviderKind::BestBuy),
            "vitacost" => Ok(ProviderKind::Vitacost),
            _ => Err(ProviderError::NotFound(s.to_string())),
        }
    }
}

/// Everything a provider constructor gets to build an instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderContext {
    /// Store the instance serves
    pub store_id: String,
    /// That store's configuration
    pub store: StoreConfig,
    /// Shared HTTP settings
    pub http: HttpConfig,
}

impl Phase2Queries {
    /// Rows scoped by source, with the optional pattern matched on the primary SKU
    pub fn by_primary_sku() -> Self {
        Self::scoped_by("sku")
    }

    /// Rows scoped by source, with the optional pattern matched on the marketplace SKU
    pub fn by_marketplace_sku() -> Self {
        Self::scoped_by("COALESCE(secondary_sku, sku)")
    }

    fn scoped_by(sku_expr: &str) -> Self {
        Self {
            select_updated: format!(
                "SELECT {} FROM products \
                 WHERE source = ?1 AND updated_flag = ?2 AND (?3 IS NULL OR {} LIKE ?3) \
                 ORDER BY sku",
                PRODUCT_COLUMNS, sku_expr
            ),
            reset_flag: "UPDATE products SET updated_flag = 0 \
                         WHERE source = ?1 AND updated_flag = ?2 AND sku = ?3"
                .to_string(),
        }
    }
}

/// Parse a provider-specific entry of `StoreConfig::options`
pub(crate) fn store_option<T: std::str::FromStr>(
    store: &StoreConfig,
    key: &str,
    default: T,
) -> Result<T, ProviderError> {
    match store.options.get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ProviderError::InvalidConfig(format!("options.{} = {:?}", key, value))),
        None => Ok(default),
    }
}
