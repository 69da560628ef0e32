//! Record normalizer.
//!
//! Remote and local records spell some fields differently. Each entity type has
//! a fixed alias table; normalizing resolves every row of the table to one value
//! and writes it under the canonical name and all aliases.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::errors::ValidationError;
use crate::models::{coerce_number, EntityType, Record};

/// How the value of an alias row is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    /// First numeric value wins; nothing numeric means zero.
    Number,
    /// First non-empty string (or number, as its decimal text) wins; nothing
    /// means the field stays absent.
    Text,
    /// First array wins; nothing means an empty list.
    List,
}

/// One row of an alias table.
#[derive(Debug, Clone, Copy)]
pub struct AliasRule {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: AliasKind,
}

impl AliasRule {
    /// Canonical name followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + Clone {
        std::iter::once(self.canonical).chain(self.aliases.iter().copied())
    }
}

const PRODUCT_ALIASES: &[AliasRule] = &[
    AliasRule {
        canonical: "stockQuantity",
        aliases: &["stock", "quantityOnHand"],
        kind: AliasKind::Number,
    },
    AliasRule {
        canonical: "sellingPrice",
        aliases: &["price"],
        kind: AliasKind::Number,
    },
];

const CUSTOMER_ALIASES: &[AliasRule] = &[
    AliasRule {
        canonical: "balanceDue",
        aliases: &["dueAmount", "outstandingBalance"],
        kind: AliasKind::Number,
    },
    AliasRule {
        canonical: "mobile",
        aliases: &["mobileNumber", "phone"],
        kind: AliasKind::Text,
    },
];

const ORDER_ALIASES: &[AliasRule] = &[
    AliasRule {
        canonical: "totalAmount",
        aliases: &["total", "grandTotal"],
        kind: AliasKind::Number,
    },
    AliasRule {
        canonical: "items",
        aliases: &["lineItems"],
        kind: AliasKind::List,
    },
];

const PURCHASE_ORDER_ALIASES: &[AliasRule] = &[
    AliasRule {
        canonical: "totalAmount",
        aliases: &["total", "grandTotal"],
        kind: AliasKind::Number,
    },
    AliasRule {
        canonical: "items",
        aliases: &["lineItems"],
        kind: AliasKind::List,
    },
    AliasRule {
        canonical: "supplierName",
        aliases: &["vendorName"],
        kind: AliasKind::Text,
    },
];

/// Alias table for an entity type.
pub fn alias_table(entity: EntityType) -> &'static [AliasRule] {
    match entity {
        EntityType::Product => PRODUCT_ALIASES,
        EntityType::Customer => CUSTOMER_ALIASES,
        EntityType::Order => ORDER_ALIASES,
        EntityType::PurchaseOrder => PURCHASE_ORDER_ALIASES,
    }
}

/// Turn a raw JSON value into a record and normalize it.
///
/// This is the only fallible step: the value must be an object carrying an
/// `id` (or a remote-style `_id`).
pub fn coerce(entity: EntityType, raw: Value) -> Result<Record, ValidationError> {
    let Value::Object(mut map) = raw else {
        return Err(ValidationError::new(entity, "record is not a JSON object"));
    };

    let id = take_id(&mut map, "id")
        .or_else(|| take_id(&mut map, "_id"))
        .ok_or_else(|| ValidationError::new(entity, "record has no id"))?;
    map.remove("_id");

    let is_synced = matches!(map.remove("isSynced"), Some(Value::Bool(true)));
    let created_at = map.remove("createdAt").and_then(timestamp_string);
    let updated_at = map.remove("updatedAt").and_then(timestamp_string);

    let record = Record {
        id,
        is_synced,
        created_at,
        updated_at,
        fields: map,
    };
    Ok(normalize(entity, record))
}

/// Populate every alias row consistently. Idempotent and infallible.
pub fn normalize(entity: EntityType, mut record: Record) -> Record {
    for rule in alias_table(entity) {
        apply_rule(&mut record.fields, rule);
    }
    record
}

fn apply_rule(fields: &mut Map<String, Value>, rule: &AliasRule) {
    let names = rule.names();

    let resolved = match rule.kind {
        AliasKind::Number => Some(
            names
                .clone()
                .find_map(|name| fields.get(name).and_then(number_value))
                .unwrap_or_else(|| Value::from(0)),
        ),
        AliasKind::Text => names.clone().find_map(|name| match fields.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(Value::String(s.clone())),
            Some(Value::Number(n)) => Some(Value::String(n.to_string())),
            _ => None,
        }),
        AliasKind::List => Some(
            names
                .clone()
                .find_map(|name| fields.get(name).filter(|v| v.is_array()).cloned())
                .unwrap_or_else(|| Value::Array(Vec::new())),
        ),
    };

    if let Some(value) = resolved {
        for name in names {
            fields.insert(name.to_string(), value.clone());
        }
    }
}

/// Numbers are kept as-is; numeric strings become numbers.
fn number_value(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => coerce_number(value).map(|_| value.clone()),
        Value::String(_) => coerce_number(value).map(number_from_f64),
        _ => None,
    }
}

fn number_from_f64(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn take_id(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    let id = match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    map.remove(key);
    Some(id)
}

/// Strings pass through; epoch milliseconds become RFC 3339.
fn timestamp_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_stock_aliases_agree() {
        let record = coerce(
            EntityType::Product,
            json!({ "id": "p1", "name": "Rice", "stock": "12" }),
        )
        .unwrap();

        assert_eq!(record.fields["stockQuantity"], json!(12));
        assert_eq!(record.fields["stock"], json!(12));
        assert_eq!(record.fields["quantityOnHand"], json!(12));
        assert_eq!(record.fields["sellingPrice"], json!(0));
    }

    #[test]
    fn test_canonical_field_wins_over_aliases() {
        let record = coerce(
            EntityType::Customer,
            json!({ "_id": "c1", "balanceDue": 40.5, "dueAmount": 10 }),
        )
        .unwrap();

        assert_eq!(record.id, "c1");
        assert_eq!(record.fields["balanceDue"], json!(40.5));
        assert_eq!(record.fields["dueAmount"], json!(40.5));
        assert_eq!(record.fields["outstandingBalance"], json!(40.5));
        assert!(!record.fields.contains_key("_id"));
    }

    #[test]
    fn test_malformed_numbers_become_zero() {
        let record = coerce(
            EntityType::Order,
            json!({ "id": 42, "total": "a lot", "grandTotal": null }),
        )
        .unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(record.fields["totalAmount"], json!(0));
        assert_eq!(record.fields["items"], json!([]));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = coerce(
            EntityType::PurchaseOrder,
            json!({
                "id": "po1",
                "vendorName": "Metro Wholesale",
                "grandTotal": "1299.99",
                "lineItems": [{ "name": "Oil", "quantity": 3, "price": 433.33 }],
                "createdAt": 1714557600000i64
            }),
        )
        .unwrap();
        let twice = normalize(EntityType::PurchaseOrder, once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.text("supplierName"), Some("Metro Wholesale"));
        assert_eq!(once.created_at.as_deref(), Some("2024-05-01T10:00:00+00:00"));
    }

    #[test]
    fn test_missing_text_alias_stays_absent() {
        let record = normalize(EntityType::Customer, Record::new("c1"));
        assert!(!record.fields.contains_key("mobile"));
        assert!(!record.fields.contains_key("phone"));
    }

    #[test]
    fn test_numeric_mobile_fills_every_alias_as_text() {
        let record = coerce(
            EntityType::Customer,
            json!({ "id": "c1", "name": "Asha", "mobile": 9876543210u64 }),
        )
        .unwrap();

        assert_eq!(record.fields["mobile"], json!("9876543210"));
        assert_eq!(record.fields["phone"], json!("9876543210"));
        assert_eq!(record.fields["mobileNumber"], json!("9876543210"));
        assert_eq!(normalize(EntityType::Customer, record.clone()), record);
    }

    #[test]
    fn test_records_without_id_are_rejected() {
        let err = coerce(EntityType::Product, json!({ "name": "Ghost" })).unwrap_err();
        assert_eq!(err.message, "record has no id");

        let err = coerce(EntityType::Product, json!("just a string")).unwrap_err();
        assert_eq!(err.entity, EntityType::Product);
    }

    #[test]
    fn test_is_synced_defaults_to_false() {
        let record = coerce(EntityType::Product, json!({ "id": "p1", "isSynced": "yes" })).unwrap();
        assert!(!record.is_synced);
        assert!(!record.fields.contains_key("isSynced"));
    }
}
