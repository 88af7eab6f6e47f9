//! Product stock view
//!
//! The catalog owns products; checkout only reads title, price, availability
//! and the stock counter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub price: Money,
    pub stock: i64,
    pub is_active: bool,
}

impl Product {
    pub fn new(title: impl Into<String>, price: Money, stock: i64) -> Self {
        Self { id: Uuid::new_v4(), title: title.into(), price, stock, is_active: true }
    }

    pub fn can_fulfil(&self, qty: u32) -> bool { self.is_active && self.stock >= i64::from(qty) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_fulfil() {
        let mut p = Product::new("Widget", Money::from_minor(100), 2);
        assert!(p.can_fulfil(2));
        assert!(!p.can_fulfil(3));
        p.is_active = false;
        assert!(!p.can_fulfil(1));
    }
}
