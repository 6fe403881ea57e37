use serde::{Deserialize, Serialize};

/// Core product entity, serialized as `{"id", "name", "price", "quantity"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

/// Response body of `GET /products/balance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub total_balance: f64,
}

impl Balance {
    /// A null aggregate (empty table) reads as zero; negative totals are clamped.
    pub fn from_sum(sum: Option<f64>) -> Self {
        let total = sum.unwrap_or(0.0);
        Self {
            total_balance: if total < 0.0 { 0.0 } else { total },
        }
    }
}

// ── Request payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CreateProduct {
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
}

/// One `column = value` pair of a partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Name(String),
    Price(f64),
    Quantity(i64),
}

impl FieldValue {
    pub fn column(&self) -> &'static str {
        match self {
            FieldValue::Name(_) => "name",
            FieldValue::Price(_) => "price",
            FieldValue::Quantity(_) => "quantity",
        }
    }
}

impl UpdateProduct {
    /// Fields present in the payload, always in declaration order.
    pub fn assignments(&self) -> Vec<FieldValue> {
        let mut fields = Vec::with_capacity(3);
        if let Some(name) = &self.name {
            fields.push(FieldValue::Name(name.clone()));
        }
        if let Some(price) = self.price {
            fields.push(FieldValue::Price(price));
        }
        if let Some(quantity) = self.quantity {
            fields.push(FieldValue::Quantity(quantity));
        }
        fields
    }
}
