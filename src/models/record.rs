//! Cached record model shared by every entity collection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The fixed set of record categories, each reconciled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Customer,
    Order,
    PurchaseOrder,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Product,
        EntityType::Customer,
        EntityType::Order,
        EntityType::PurchaseOrder,
    ];

    /// Name used for the local table key and the host API path.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Customer => "customer",
            EntityType::Order => "order",
            EntityType::PurchaseOrder => "purchase_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(EntityType::Product),
            "customer" => Some(EntityType::Customer),
            "order" => Some(EntityType::Order),
            "purchase_order" => Some(EntityType::PurchaseOrder),
            _ => None,
        }
    }

    /// Path of the collection on the remote service.
    pub fn collection_path(&self) -> &'static str {
        match self {
            EntityType::Product => "/api/products",
            EntityType::Customer => "/api/customers",
            EntityType::Order => "/api/orders",
            EntityType::PurchaseOrder => "/api/purchase-orders",
        }
    }

    /// Orders and purchase orders carry immutable line items.
    pub fn is_order_like(&self) -> bool {
        matches!(self, EntityType::Order | EntityType::PurchaseOrder)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cached record.
///
/// The base fields are typed; everything else is kept as an opaque JSON
/// payload, which the normalizer and duplicate detector inspect by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[cfg(test)]
impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_synced: false,
            created_at: None,
            updated_at: None,
            fields: Map::new(),
        }
    }

    /// Builder-style helper used when assembling records by hand.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn synced(mut self, is_synced: bool) -> Self {
        self.is_synced = is_synced;
        self
    }

    pub fn created(mut self, at: impl Into<String>) -> Self {
        self.created_at = Some(at.into());
        self
    }
}

impl Record {
    /// String payload field, trimmed; empty strings read as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Identifier-like payload field: strings and numbers both count.
    pub fn ident(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Numeric payload field, accepting numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(coerce_number)
    }
}

/// Read a JSON value as a finite number, accepting numeric strings.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}
