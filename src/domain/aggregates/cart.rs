//! Cart Aggregate

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    user_id: Uuid,
    items: Vec<CartItem>,
}

/// Cart line. `unit_price` is whatever the cart cached, not authoritative for checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: Uuid,
    pub title: String,
    pub unit_price: Money,
    pub qty: u32,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.times(self.qty) }
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self { Self { user_id, items: vec![] } }

    pub fn with_items(user_id: Uuid, items: Vec<CartItem>) -> Self {
        let mut cart = Self::new(user_id);
        for item in items { cart.add_item(item); }
        cart
    }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn total(&self) -> Money { self.items.iter().map(CartItem::line_total).sum() }

    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.qty += item.qty;
        } else {
            self.items.push(item);
        }
    }

    pub fn clear(&mut self) { self.items.clear(); }
}
