//! Shape and constraint checks for product request bodies and path ids.
//!
//! Bodies arrive as a raw JSON object so that every offending field can be
//! reported at once, with light coercion (numeric strings, integral floats)
//! applied before the range checks.

use std::collections::BTreeMap;
use std::fmt;

use axum::{
    extract::{FromRequest, FromRequestParts, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{CreateProduct, UpdateProduct};

const KNOWN_FIELDS: [&str; 3] = ["name", "price", "quantity"];

const MISSING: &str = "Missing data for required field.";
const NULL: &str = "Field may not be null.";
const UNKNOWN: &str = "Unknown field.";
const EMPTY_UPDATE: &str = "No fields provided to update.";
const INVALID_STRING: &str = "Not a valid string.";
const INVALID_NUMBER: &str = "Not a valid number.";
const INVALID_INTEGER: &str = "Not a valid integer.";
const NAME_TOO_SHORT: &str = "Shorter than minimum length 1.";
const NON_FINITE: &str = "Special numeric values (nan or infinity) are not permitted.";
const NEGATIVE_PRICE: &str = "Price must be greater than or equal to 0.";
const NEGATIVE_QUANTITY: &str = "Quantity must be greater than or equal to 0.";

/// A JSON object request body, not yet validated.
#[derive(Debug, Deserialize, FromRequest)]
#[serde(transparent)]
#[from_request(via(Json), rejection(AppError))]
pub struct Payload(pub Map<String, Value>);

/// The `{id}` path segment. Non-numeric and negative values are rejected by
/// the extractor with the usual JSON error body.
#[derive(Debug, Clone, Copy, Deserialize, FromRequestParts)]
#[serde(transparent)]
#[from_request(via(Path), rejection(AppError))]
pub struct ProductId(pub u64);

impl ProductId {
    /// Stored ids are `i64`; anything larger cannot exist.
    pub fn get(self) -> AppResult<i64> {
        i64::try_from(self.0).map_err(|_| AppError::product_not_found())
    }
}

/// Field name → messages. Payload-level problems go under `_schema`.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    fn reject_unknown(&mut self, body: &Map<String, Value>) {
        for key in body.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                self.add(key, UNKNOWN);
            }
        }
    }

    fn check<T>(&mut self, field: &str, parsed: Result<T, &'static str>) -> Option<T> {
        match parsed {
            Ok(value) => Some(value),
            Err(message) => {
                self.add(field, message);
                None
            }
        }
    }

    fn required<T>(
        &mut self,
        body: &Map<String, Value>,
        field: &str,
        parse: fn(&Value) -> Result<T, &'static str>,
    ) -> Option<T> {
        match body.get(field) {
            Some(value) => self.check(field, parse(value)),
            None => {
                self.add(field, MISSING);
                None
            }
        }
    }

    fn optional<T>(
        &mut self,
        body: &Map<String, Value>,
        field: &str,
        parse: fn(&Value) -> Result<T, &'static str>,
    ) -> Option<T> {
        body.get(field).and_then(|value| self.check(field, parse(value)))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

fn parse_name(value: &Value) -> Result<String, &'static str> {
    match value {
        Value::Null => Err(NULL),
        Value::String(s) if s.is_empty() => Err(NAME_TOO_SHORT),
        Value::String(s) => Ok(s.clone()),
        _ => Err(INVALID_STRING),
    }
}

fn parse_price(value: &Value) -> Result<f64, &'static str> {
    let price = match value {
        Value::Null => return Err(NULL),
        Value::Number(n) => n.as_f64().ok_or(INVALID_NUMBER)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| INVALID_NUMBER)?,
        _ => return Err(INVALID_NUMBER),
    };
    if !price.is_finite() {
        return Err(NON_FINITE);
    }
    if price < 0.0 {
        return Err(NEGATIVE_PRICE);
    }
    Ok(price)
}

fn parse_quantity(value: &Value) -> Result<i64, &'static str> {
    let quantity = match value {
        Value::Null => return Err(NULL),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => integral(n.as_f64().ok_or(INVALID_INTEGER)?)?,
        },
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| INVALID_INTEGER)?,
        _ => return Err(INVALID_INTEGER),
    };
    if quantity < 0 {
        return Err(NEGATIVE_QUANTITY);
    }
    Ok(quantity)
}

/// Accepts `3.0` as `3`; rejects fractions and values outside `i64`.
fn integral(f: f64) -> Result<i64, &'static str> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(INVALID_INTEGER)
    }
}

impl TryFrom<Payload> for CreateProduct {
    type Error = ValidationErrors;

    fn try_from(Payload(body): Payload) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::default();
        errors.reject_unknown(&body);
        let name = errors.required(&body, "name", parse_name);
        let price = errors.required(&body, "price", parse_price);
        let quantity = errors.required(&body, "quantity", parse_quantity);

        match (name, price, quantity) {
            (Some(name), Some(price), Some(quantity)) if errors.is_empty() => Ok(CreateProduct {
                name,
                price,
                quantity,
            }),
            _ => Err(errors),
        }
    }
}

impl TryFrom<Payload> for UpdateProduct {
    type Error = ValidationErrors;

    fn try_from(Payload(body): Payload) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::default();
        if body.is_empty() {
            errors.add("_schema", EMPTY_UPDATE);
            return Err(errors);
        }

        errors.reject_unknown(&body);
        let update = UpdateProduct {
            name: errors.optional(&body, "name", parse_name),
            price: errors.optional(&body, "price", parse_price),
            quantity: errors.optional(&body, "quantity", parse_quantity),
        };

        if errors.is_empty() {
            Ok(update)
        } else {
            Err(errors)
        }
    }
}
