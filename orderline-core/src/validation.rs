//! Structural validation of incoming orders.
//!
//! The service accepts any [`OrderValidator`]; [`StructuralValidator`] is the
//! default rule set. Validators report every violation they find rather than
//! stopping at the first one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::Order;

/// Maximum length accepted for `order_uid`.
pub const MAX_ORDER_UID_LEN: usize = 64;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("static email regex")
});

/// A single rejected field, addressed by its dotted JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}: {}", self.field, self.reason)
    }
}

/// Validation seam used by the order service.
pub trait OrderValidator: Send + Sync {
    fn validate(&self, order: &Order) -> Result<(), Vec<FieldViolation>>;
}

/// Default rule set for orders arriving from the producer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }
}

impl OrderValidator for StructuralValidator {
    fn validate(&self, order: &Order) -> Result<(), Vec<FieldViolation>> {
        let mut v = Violations::default();

        v.required("order_uid", &order.order_uid);
        if order.order_uid.chars().count() > MAX_ORDER_UID_LEN {
            v.push(
                "order_uid",
                format!("must be at most {} characters", MAX_ORDER_UID_LEN),
            );
        }
        v.required("track_number", &order.track_number);
        v.required("entry", &order.entry);
        v.required("locale", &order.locale);
        v.required("customer_id", &order.customer_id);
        v.required("delivery_service", &order.delivery_service);

        let d = &order.delivery;
        v.required("delivery.name", &d.name);
        v.required("delivery.phone", &d.phone);
        v.required("delivery.city", &d.city);
        v.required("delivery.address", &d.address);
        if !d.email.is_empty() && !EMAIL_RE.is_match(&d.email) {
            v.push("delivery.email", "must be a valid email address");
        }

        let p = &order.payment;
        v.required("payment.transaction", &p.transaction);
        v.required("payment.currency", &p.currency);
        if !p.currency.is_empty()
            && (p.currency.len() != 3 || !p.currency.chars().all(|c| c.is_ascii_alphabetic()))
        {
            v.push("payment.currency", "must be a three-letter currency code");
        }
        v.required("payment.provider", &p.provider);
        v.non_negative("payment.amount", p.amount);
        v.non_negative("payment.delivery_cost", p.delivery_cost);
        v.non_negative("payment.goods_total", p.goods_total);
        v.non_negative("payment.custom_fee", p.custom_fee);
        if p.payment_dt <= 0 {
            v.push("payment.payment_dt", "must be a positive unix timestamp");
        }

        for (i, item) in order.items.iter().enumerate() {
            v.required(&format!("items[{}].name", i), &item.name);
            v.required(&format!("items[{}].track_number", i), &item.track_number);
            v.required(&format!("items[{}].rid", i), &item.rid);
            v.non_negative(&format!("items[{}].price", i), item.price);
            v.non_negative(&format!("items[{}].total_price", i), item.total_price);
            if !(0..=100).contains(&item.sale) {
                v.push(format!("items[{}].sale", i), "must be between 0 and 100");
            }
        }

        v.finish()
    }
}

#[derive(Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.push(FieldViolation::new(field, reason));
    }

    fn required(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        }
    }

    fn non_negative(&mut self, field: &str, value: i64) {
        if value < 0 {
            self.push(field, "must be at least 0");
        }
    }

    fn finish(self) -> Result<(), Vec<FieldViolation>> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.0)
        }
    }
}
