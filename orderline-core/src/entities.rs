//! Order aggregate structures
//!
//! Field names follow the JSON emitted by the upstream order producer, so the
//! same types serve as the message payload, the cached value and the HTTP
//! response body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Globally unique order identifier. Immutable once created and the sole
/// cache/store key.
pub type OrderUid = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Order - aggregate root.
///
/// Owns exactly one [`Delivery`], exactly one [`Payment`] and an ordered
/// sequence of [`Item`]s. An order with zero items is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_uid: OrderUid,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i64,
    pub date_created: Timestamp,
    pub oof_shard: String,
}

/// Delivery sub-record. Exactly one per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment sub-record. Exactly one per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Unix seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    #[serde(default)]
    pub custom_fee: i64,
}

/// A single line item of an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i64,
}
