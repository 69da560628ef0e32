//! Batch duplicate detection.
//!
//! Remote batches may carry several copies of the same logical record whose ids
//! are not comparable yet, so matching falls back to content. A candidate is
//! only ever compared with records already accepted from the same batch.

use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::{coerce_number, EntityType, Record};

/// Largest difference between two totals that still counts as equal.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

/// Largest gap between two creation timestamps of the same order.
pub const CREATED_AT_WINDOW_MS: i64 = 5_000;

/// True when `candidate` duplicates any record in `accepted`, by exact id or by content.
pub fn is_duplicate(entity: EntityType, candidate: &Record, accepted: &[Record]) -> bool {
    accepted
        .iter()
        .any(|existing| existing.id == candidate.id || same_record(entity, candidate, existing))
}

/// Entity-specific content match between two records.
pub fn same_record(entity: EntityType, a: &Record, b: &Record) -> bool {
    match entity {
        EntityType::Product => same_product(a, b),
        EntityType::Customer => same_customer(a, b),
        EntityType::Order | EntityType::PurchaseOrder => same_order(entity, a, b),
    }
}

fn same_product(a: &Record, b: &Record) -> bool {
    folded(a, "name") == folded(b, "name") && folded(a, "description") == folded(b, "description")
}

fn same_customer(a: &Record, b: &Record) -> bool {
    if folded(a, "name") != folded(b, "name") {
        return false;
    }

    let (mobile_a, mobile_b) = (mobile(a), mobile(b));
    let (email_a, email_b) = (folded(a, "email"), folded(b, "email"));

    if let (Some(x), Some(y)) = (&mobile_a, &mobile_b) {
        if x == y {
            return true;
        }
    }
    if let (Some(x), Some(y)) = (&email_a, &email_b) {
        if x == y {
            return true;
        }
    }

    mobile_a.is_none() && mobile_b.is_none() && email_a.is_none() && email_b.is_none()
}

fn same_order(entity: EntityType, a: &Record, b: &Record) -> bool {
    if a.ident("sellerId") != b.ident("sellerId") {
        return false;
    }

    let counterpart_matches = match entity {
        EntityType::PurchaseOrder => folded(a, "supplierName") == folded(b, "supplierName"),
        _ => a.ident("customerId") == b.ident("customerId"),
    };
    if !counterpart_matches {
        return false;
    }

    let total_a = a.number("totalAmount").unwrap_or(0.0);
    let total_b = b.number("totalAmount").unwrap_or(0.0);
    // Small epsilon so 523.50 vs 523.51 still lands inside the tolerance.
    if (total_a - total_b).abs() > AMOUNT_TOLERANCE + 1e-9 {
        return false;
    }

    if line_items_hash(a) != line_items_hash(b) {
        return false;
    }

    created_close(a, b)
}

/// Timestamps within the window; without both timestamps, ids must match.
fn created_close(a: &Record, b: &Record) -> bool {
    let parse = |r: &Record| r.created_at.as_deref().and_then(parse_timestamp);

    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => (x - y).num_milliseconds().abs() <= CREATED_AT_WINDOW_MS,
        _ => a.id == b.id,
    }
}

/// RFC 3339, or an ISO timestamp without offset read as UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Order-independent hash of an order's line items (name, quantity, price).
pub fn line_items_hash(record: &Record) -> String {
    let mut lines: Vec<String> = record
        .fields
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let name = item
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(|s| s.trim().to_lowercase())
                        .unwrap_or_default();
                    let quantity = item.get("quantity").and_then(coerce_number).unwrap_or(0.0);
                    let price = item.get("price").and_then(coerce_number).unwrap_or(0.0);
                    format!("{}|{}|{}", name, quantity, price)
                })
                .collect()
        })
        .unwrap_or_default();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn folded(record: &Record, key: &str) -> Option<String> {
    record.text(key).map(str::to_lowercase)
}

fn mobile(record: &Record) -> Option<String> {
    let digits: String = record
        .ident("mobile")?
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    (!digits.is_empty()).then_some(digits)
}
