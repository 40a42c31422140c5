//! Product domain models
//!
//! The canonical per-SKU record and the partial update a supplier fetch
//! produces for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published availability of a product
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Availability {
    /// Sellable
    InStock,
    /// Not sellable
    #[default]
    OutOfStock,
}

impl Availability {
    /// Whether this is [`Availability::InStock`]
    pub fn is_in_stock(self) -> bool {
        matches!(self, Availability::InStock)
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::InStock => write!(f, "inStock"),
            Availability::OutOfStock => write!(f, "outOfStock"),
        }
    }
}

impl std::str::FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instock" | "in_stock" => Ok(Availability::InStock),
            "outofstock" | "out_of_stock" => Ok(Availability::OutOfStock),
            _ => Err(format!("Invalid availability: {}", s)),
        }
    }
}

/// Canonical per-SKU product state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Primary key
    pub sku: String,

    /// SKU listed on the marketplace when it differs from the supplier SKU
    pub secondary_sku: Option<String>,

    /// External catalog id on the marketplace
    pub marketplace_id: Option<String>,

    /// Owning store id
    pub source: String,

    /// Supplier price
    pub supplier_price: f64,

    /// Freight cost added on top of the supplier price
    pub freight_cost: f64,

    /// Human-readable lead time label
    pub lead_time: Option<String>,

    /// Supplier lead time in days
    pub lead_time_days: i64,

    /// Published quantity
    pub quantity: i64,

    /// Supplier tax
    pub tax_supplier: f64,

    /// Published availability
    pub availability: Availability,

    /// Shipping price charged to the customer
    pub customer_price_shipping: f64,

    /// Shipping price charged by the supplier
    pub supplier_price_shipping: f64,

    /// Days quoted to the marketplace before shipping
    pub handling_time: i64,

    /// Brand name
    pub brand: Option<String>,

    /// Owning store's flag value while dirty, 0 once published
    pub updated_flag: i64,

    /// Last time phase 1 touched the row
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    /// Create a clean record with zeroed numeric fields
    pub fn new(sku: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            secondary_sku: None,
            marketplace_id: None,
            source: source.into(),
            supplier_price: 0.0,
            freight_cost: 0.0,
            lead_time: None,
            lead_time_days: 0,
            quantity: 0,
            tax_supplier: 0.0,
            availability: Availability::OutOfStock,
            customer_price_shipping: 0.0,
            supplier_price_shipping: 0.0,
            handling_time: 0,
            brand: None,
            updated_flag: 0,
            last_updated_at: None,
        }
    }

    /// Set supplier price and freight
    pub fn with_price(mut self, supplier_price: f64, freight_cost: f64) -> Self {
        self.supplier_price = supplier_price;
        self.freight_cost = freight_cost;
        self
    }

    /// Set stock state
    pub fn with_stock(mut self, availability: Availability, quantity: i64) -> Self {
        self.availability = availability;
        self.quantity = quantity;
        self
    }

    /// Set the updated flag
    pub fn with_updated_flag(mut self, flag: i64) -> Self {
        self.updated_flag = flag;
        self
    }

    /// Set the marketplace-side SKU
    pub fn with_secondary_sku(mut self, secondary_sku: impl Into<String>) -> Self {
        self.secondary_sku = Some(secondary_sku.into());
        self
    }

    /// Supplier price plus freight, always derived from its inputs
    pub fn total_price(&self) -> f64 {
        self.supplier_price + self.freight_cost
    }

    /// Whether the row changed since the last publish
    pub fn is_dirty(&self) -> bool {
        self.updated_flag != 0
    }

    /// SKU the marketplace knows this product by
    pub fn marketplace_sku(&self) -> &str {
        self.secondary_sku.as_deref().unwrap_or(&self.sku)
    }
}

/// Fields a successful supplier fetch writes onto a [`ProductRecord`]
///
/// `None` means the supplier did not report the value and the stored one is
/// kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDelta {
    /// Derived availability
    pub availability: Availability,
    /// Derived quantity
    pub quantity: i64,
    /// Supplier price
    pub supplier_price: Option<f64>,
    /// Freight cost
    pub freight_cost: Option<f64>,
    /// Brand
    pub brand: Option<String>,
    /// Lead time label
    pub lead_time: Option<String>,
    /// Supplier lead days
    pub lead_time_days: i64,
    /// Handling days quoted to the marketplace
    pub handling_time: i64,
}

impl ProductDelta {
    /// Delta that takes a product off sale without touching its price
    pub fn unavailable(lead_time_days: i64, handling_time: i64) -> Self {
        Self {
            availability: Availability::OutOfStock,
            quantity: 0,
            supplier_price: None,
            freight_cost: None,
            brand: None,
            lead_time: None,
            lead_time_days,
            handling_time,
        }
    }

    /// Whether applying this delta would change the stored record
    pub fn differs_from(&self, record: &ProductRecord) -> bool {
        let price_changed = |new: Option<f64>, old: f64| {
            new.map(|v| (v - old).abs() > f64::EPSILON)
                .unwrap_or(false)
        };
        let text_changed = |new: &Option<String>, old: &Option<String>| {
            new.is_some() && new != old
        };

        self.availability != record.availability
            || self.quantity != record.quantity
            || self.lead_time_days != record.lead_time_days
            || self.handling_time != record.handling_time
            || price_changed(self.supplier_price, record.supplier_price)
            || price_changed(self.freight_cost, record.freight_cost)
            || text_changed(&self.brand, &record.brand)
            || text_changed(&self.lead_time, &record.lead_time)
    }
}
