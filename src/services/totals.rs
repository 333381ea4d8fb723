use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::cart::CartSnapshotItem;

/// Shipping rule: free at or above the threshold, flat fee below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    pub free_shipping_threshold: i64,
    pub flat_shipping_fee: i64,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self {
            free_shipping_threshold: 999,
            flat_shipping_fee: 99,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub total: i64,
}

/// Computes order totals from snapshot prices. Never reads client-supplied amounts.
pub fn calculate_totals(items: &[CartSnapshotItem], policy: &ShippingPolicy) -> OrderTotals {
    let subtotal: i64 = items
        .iter()
        .map(|item| item.price * i64::from(item.quantity))
        .sum();
    let shipping_cost = if subtotal >= policy.free_shipping_threshold {
        0
    } else {
        policy.flat_shipping_fee
    };

    OrderTotals {
        subtotal,
        shipping_cost,
        total: subtotal + shipping_cost,
    }
}
