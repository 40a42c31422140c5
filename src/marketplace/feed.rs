//! Inventory feed documents
//!
//! One document per phase 2 batch. Every product becomes one
//! `PARTIAL_UPDATE` message keyed by its marketplace SKU, numbered from 1 in
//! batch order so report issues can be traced back by message id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::MarketplaceConfig;
use crate::error::FeedError;
use crate::models::ProductRecord;

/// Feed schema version
pub const FEED_VERSION: &str = "2.0";
/// Locale issues are reported in
pub const ISSUE_LOCALE: &str = "en_US";
/// Operation applied by every message
pub const OPERATION_PARTIAL_UPDATE: &str = "PARTIAL_UPDATE";
/// Product type sent with every message
pub const PRODUCT_TYPE: &str = "PRODUCT";

/// Document header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedHeader {
    pub seller_id: String,
    pub version: String,
    pub issue_locale: String,
}

/// One product update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessage {
    pub message_id: u64,
    pub sku: String,
    pub operation_type: String,
    pub product_type: String,
    pub attributes: MessageAttributes,
}

/// Listing attributes carried by a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttributes {
    pub fulfillment_availability: Vec<FulfillmentAvailability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchasable_offer: Option<Vec<PurchasableOffer>>,
}

/// Quantity and handling time for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentAvailability {
    pub fulfillment_channel_code: String,
    pub quantity: i64,
    pub lead_time_to_ship_max_days: i64,
}

/// Offer price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchasableOffer {
    pub currency: String,
    pub our_price: Vec<PriceSchedule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSchedule {
    pub schedule: Vec<ScheduledPrice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPrice {
    pub value_with_tax: f64,
}

/// What goes into every message besides the product itself
#[derive(Debug, Clone, PartialEq)]
pub struct FeedOptions {
    pub seller_id: String,
    pub fulfillment_channel: String,
    pub publish_price: bool,
    pub currency: String,
}

impl FeedOptions {
    /// Options from the marketplace section of the configuration
    pub fn from_config(config: &MarketplaceConfig) -> Self {
        Self {
            seller_id: config.seller_id.clone(),
            fulfillment_channel: config.fulfillment_channel.clone(),
            publish_price: config.publish_price,
            currency: config.currency.clone(),
        }
    }
}

/// Complete feed document for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDocument {
    pub header: FeedHeader,
    pub messages: Vec<FeedMessage>,
}

impl FeedDocument {
    /// Build the document for a batch of products
    ///
    /// Out-of-stock products are published with quantity 0. A price is only
    /// attached when publishing prices is enabled and the product has one.
    pub fn build(products: &[ProductRecord], options: &FeedOptions) -> Self {
        let messages = products
            .iter()
            .enumerate()
            .map(|(i, product)| FeedMessage {
                message_id: i as u64 + 1,
                sku: product.marketplace_sku().to_string(),
                operation_type: OPERATION_PARTIAL_UPDATE.to_string(),
                product_type: PRODUCT_TYPE.to_string(),
                attributes: MessageAttributes {
                    fulfillment_availability: vec![FulfillmentAvailability {
                        fulfillment_channel_code: options.fulfillment_channel.clone(),
                        quantity: if product.availability.is_in_stock() {
                            product.quantity.max(0)
                        } else {
                            0
                        },
                        lead_time_to_ship_max_days: product.handling_time,
                    }],
                    purchasable_offer: offer_for(product, options),
                },
            })
            .collect();

        Self {
            header: FeedHeader {
                seller_id: options.seller_id.clone(),
                version: FEED_VERSION.to_string(),
                issue_locale: ISSUE_LOCALE.to_string(),
            },
            messages,
        }
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the document has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// `(message id, SKU)` pairs in message order
    pub fn message_skus(&self) -> Vec<(u64, String)> {
        self.messages
            .iter()
            .map(|m| (m.message_id, m.sku.clone()))
            .collect()
    }

    /// Serialized body as uploaded
    pub fn to_json(&self) -> Result<Vec<u8>, FeedError> {
        serde_json::to_vec(self).map_err(|e| FeedError::Serialization(e.to_string()))
    }

    /// SHA-256 hex digest of the serialized body
    pub fn digest(&self) -> Result<String, FeedError> {
        Ok(content_digest(&self.to_json()?))
    }
}

/// SHA-256 hex digest of a feed body
pub fn content_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn offer_for(product: &ProductRecord, options: &FeedOptions) -> Option<Vec<PurchasableOffer>> {
    let price = product.total_price();
    if !options.publish_price || price <= 0.0 {
        return None;
    }

    Some(vec![PurchasableOffer {
        currency: options.currency.clone(),
        our_price: vec![PriceSchedule {
            schedule: vec![ScheduledPrice {
                value_with_tax: (price * 100.0).round() / 100.0,
            }],
        }],
    }])
}
