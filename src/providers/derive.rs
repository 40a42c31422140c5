//! Store rules shared by every provider
//!
//! A product is in stock only when the supplier flags it available and, if a
//! count is reported, the count strictly exceeds the store threshold. The
//! published quantity is the store's fixed stock level, never the supplier
//! count.

use chrono::NaiveDate;

use crate::config::{LeadTimeRounding, StoreConfig};
use crate::models::{Availability, ProductDelta};

use super::RawSupplierData;

/// Turn a raw supplier answer into the fields phase 1 writes
pub fn derive_delta(raw: &RawSupplierData, config: &StoreConfig, today: NaiveDate) -> ProductDelta {
    let in_stock = raw.available
        && raw
            .stock
            .map_or(true, |stock| stock > config.stock_level_threshold);

    let (availability, quantity) = if in_stock {
        (Availability::InStock, config.stock_level)
    } else {
        (Availability::OutOfStock, 0)
    };

    let lead_time_days = lead_time_days(
        raw.min_delivery,
        raw.max_delivery,
        today,
        config.lead_time_rounding,
    )
    .unwrap_or(config.provider_handling_days);

    ProductDelta {
        availability,
        quantity,
        supplier_price: raw.price,
        freight_cost: raw.freight,
        brand: raw.brand.clone().filter(|b| !b.is_empty()),
        lead_time: raw.lead_time_label.clone(),
        lead_time_days,
        handling_time: config.omd_handling_days + lead_time_days,
    }
}

/// Days from `today` to the middle of the supplier's delivery window
///
/// With only one bound the window collapses onto it. Dates in the past count
/// as zero days.
pub fn lead_time_days(
    min_delivery: Option<NaiveDate>,
    max_delivery: Option<NaiveDate>,
    today: NaiveDate,
    rounding: LeadTimeRounding,
) -> Option<i64> {
    let (min, max) = match (min_delivery, max_delivery) {
        (Some(min), Some(max)) => (min, max),
        (Some(only), None) | (None, Some(only)) => (only, only),
        (None, None) => return None,
    };

    let from_today = |date: NaiveDate| (date - today).num_days().max(0);
    let midpoint = (from_today(min) + from_today(max)) as f64 / 2.0;

    let days = match rounding {
        LeadTimeRounding::Ceil => midpoint.ceil(),
        LeadTimeRounding::Floor => midpoint.floor(),
    };
    Some(days as i64)
}
