//! Orderline Test Utilities
//!
//! Shared test infrastructure for the orderline workspace:
//! - Fixtures for well-formed orders
//! - Proptest generators for the order aggregate

pub use orderline_core::{Delivery, Item, Order, OrderUid, Payment};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

// ============================================================================
// FIXTURES
// ============================================================================

/// A well-formed order with `n_items` items that passes structural validation.
///
/// Field values are derived from `order_uid` so two fixtures with different
/// ids never compare equal.
pub fn sample_order(order_uid: &str, n_items: usize) -> Order {
    let track_number = format!("TRACK-{}", order_uid);
    let items: Vec<Item> = (0..n_items)
        .map(|i| sample_item(&track_number, i))
        .collect();
    let goods_total: i64 = items.iter().map(|item| item.total_price).sum();

    Order {
        order_uid: order_uid.to_string(),
        track_number: track_number.clone(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: order_uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: goods_total + 1500,
            payment_dt: 1_637_907_727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total,
            custom_fee: 0,
        },
        items,
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).single().unwrap_or_default(),
        oof_shard: "1".to_string(),
    }
}

fn sample_item(track_number: &str, index: usize) -> Item {
    let price = 453 + index as i64;
    let sale = 30;
    Item {
        chrt_id: 9_934_930 + index as i64,
        track_number: track_number.to_string(),
        price,
        rid: format!("rid-{}-{}", track_number, index),
        name: format!("Item {}", index),
        sale,
        size: "0".to_string(),
        total_price: price * (100 - sale) / 100,
        nm_id: 2_389_212,
        brand: "Vivienne Sabo".to_string(),
        status: 202,
    }
}

/// JSON payload of [`sample_order`], as the producer would publish it.
pub fn sample_payload(order_uid: &str, n_items: usize) -> Vec<u8> {
    serde_json::to_vec(&sample_order(order_uid, n_items)).unwrap_or_default()
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Generate an order id accepted by the validator.
pub fn arb_order_uid() -> impl Strategy<Value = OrderUid> {
    "[a-z0-9]{1,32}"
}

fn arb_text() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{0,23}"
}

/// Generate a valid line item.
pub fn arb_item() -> impl Strategy<Value = Item> {
    (
        any::<u32>(),
        arb_text(),
        0i64..1_000_000,
        "[a-z0-9]{8,20}",
        arb_text(),
        0i64..=100,
        "[0-9]{1,2}",
        0i64..1_000_000,
        any::<u32>(),
        arb_text(),
        0i64..1000,
    )
        .prop_map(
            |(chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status)| {
                Item {
                    chrt_id: chrt_id as i64,
                    track_number,
                    price,
                    rid,
                    name,
                    sale,
                    size,
                    total_price,
                    nm_id: nm_id as i64,
                    brand,
                    status,
                }
            },
        )
}

/// Generate a valid order with up to `max_items` items.
pub fn arb_order(max_items: usize) -> impl Strategy<Value = Order> {
    (
        arb_order_uid(),
        arb_text(),
        prop::collection::vec(arb_item(), 0..=max_items),
        "[a-z]{3,10}@[a-z]{3,10}\\.(com|org|net)",
        "[A-Z]{3}",
        0i64..10_000_000,
        1i64..2_000_000_000,
        0i64..1_000_000_000,
    )
        .prop_map(
            |(order_uid, track_number, items, email, currency, amount, payment_dt, created_secs)| {
                let mut order = sample_order(&order_uid, 0);
                order.track_number = track_number;
                order.items = items;
                order.delivery.email = email;
                order.payment.currency = currency;
                order.payment.amount = amount;
                order.payment.payment_dt = payment_dt;
                order.date_created = Utc
                    .timestamp_opt(1_500_000_000 + created_secs, 0)
                    .single()
                    .unwrap_or_default();
                order
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderline_core::{OrderValidator, StructuralValidator};

    #[test]
    fn test_sample_order_is_valid() {
        let validator = StructuralValidator::new();
        for n in 0..4 {
            assert!(validator.validate(&sample_order("A1", n)).is_ok());
        }
    }

    #[test]
    fn test_sample_payload_decodes() {
        let order: Order = serde_json::from_slice(&sample_payload("A1", 2)).unwrap();
        assert_eq!(order, sample_order("A1", 2));
        assert_eq!(order.items.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_generated_orders_pass_validation(order in arb_order(4)) {
            prop_assert!(StructuralValidator::new().validate(&order).is_ok());
        }
    }
}
