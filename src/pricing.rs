//! Deterministic order pricing: plan unit price + distance-slab delivery fee.
//!
//! The engine is the single authority for amounts — handlers recompute every
//! quote from the validated tables and never trust a client-supplied amount.

use crate::config::{DeliveryConfig, PricingConfig, Slab};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Meal plan offered on the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanType {
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "breakfast")]
    Breakfast,
    #[serde(rename = "monthlyVeg")]
    MonthlyVeg,
    #[serde(rename = "monthlyNonVeg")]
    MonthlyNonVeg,
}

impl PlanType {
    pub const ALL: [PlanType; 4] = [
        Self::Daily,
        Self::Breakfast,
        Self::MonthlyVeg,
        Self::MonthlyNonVeg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Breakfast => "breakfast",
            Self::MonthlyVeg => "monthlyVeg",
            Self::MonthlyNonVeg => "monthlyNonVeg",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "breakfast" => Some(Self::Breakfast),
            "monthlyVeg" => Some(Self::MonthlyVeg),
            "monthlyNonVeg" => Some(Self::MonthlyNonVeg),
            _ => None,
        }
    }
}

/// An unknown plan name is rejected while parsing the request (the
/// [`PlanType`] enum plus startup table validation make a missing price
/// unrepresentable here), so quoting can only fail on quantity.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PricingError {
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("order total is out of range")]
    AmountOverflow,
}

/// A server-side price computation for one order request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub unit_price: u32,
    pub delivery_fee: u32,
    pub amount: u32,
}

/// Pricing tables validated at startup, immutable afterwards.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    daily_meal: u32,
    breakfast: u32,
    monthly_veg: u32,
    monthly_non_veg: u32,
    slabs: Vec<Slab>,
}

impl PricingEngine {
    pub fn new(pricing: &PricingConfig, delivery: &DeliveryConfig) -> Self {
        Self {
            daily_meal: pricing.daily_meal,
            breakfast: pricing.breakfast,
            monthly_veg: pricing.monthly_veg,
            monthly_non_veg: pricing.monthly_non_veg,
            slabs: delivery.slabs.clone(),
        }
    }

    pub fn unit_price(&self, plan: PlanType) -> u32 {
        match plan {
            PlanType::Daily => self.daily_meal,
            PlanType::Breakfast => self.breakfast,
            PlanType::MonthlyVeg => self.monthly_veg,
            PlanType::MonthlyNonVeg => self.monthly_non_veg,
        }
    }

    /// Delivery fee for a distance: first slab whose ceiling covers it,
    /// otherwise the last slab's fee. Distance never rejects an order —
    /// the fee caps at the top slab. Negative input clamps to zero.
    pub fn delivery_fee(&self, distance_km: f64) -> u32 {
        let km = if distance_km.is_finite() {
            distance_km.max(0.0)
        } else {
            0.0
        };
        for slab in &self.slabs {
            if km <= slab.max_km {
                return slab.fee;
            }
        }
        // validated non-empty at startup
        self.slabs.last().map(|s| s.fee).unwrap_or(0)
    }

    /// Price one order. Pure and deterministic:
    /// `amount = unit_price * qty + delivery_fee`.
    pub fn quote(&self, plan: PlanType, qty: u32, distance_km: f64) -> Result<Quote, PricingError> {
        if qty == 0 {
            return Err(PricingError::ZeroQuantity);
        }
        let unit_price = self.unit_price(plan);
        let delivery_fee = self.delivery_fee(distance_km);
        let amount = unit_price
            .checked_mul(qty)
            .and_then(|meals| meals.checked_add(delivery_fee))
            .ok_or(PricingError::AmountOverflow)?;
        Ok(Quote {
            unit_price,
            delivery_fee,
            amount,
        })
    }

    /// Menu snapshot in the shape clients render (`GET /menu`).
    pub fn menu_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "pricing": {
                "dailyMeal": self.daily_meal,
                "breakfast": self.breakfast,
                "monthlyVeg": self.monthly_veg,
                "monthlyNonVeg": self.monthly_non_veg,
            }
        })
    }

}
