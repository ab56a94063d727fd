// ============================================================================
// src/core/collation.rs - Total ordering over JSON values
// ============================================================================
//
// Used both for view key ranges in the in-memory store and for client-side
// ORDER BY in the query engine. Follows CouchDB view collation:
//
//   null < false < true < numbers < strings < arrays < objects
//
// Arrays compare element-wise, then by length. Objects compare by their
// (key, value) pairs in insertion order, then by size.
// ============================================================================

use serde_json::Value;
use std::cmp::Ordering;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Compares two JSON values using view collation order.
pub fn compare_json(left: &Value, right: &Value) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ordering = compare_json(x, y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                let ordering = ka.cmp(kb).then_with(|| compare_json(va, vb));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        // Same rank: null/null or identical booleans.
        _ => Ordering::Equal,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_ranks() {
        let ordered = vec![
            json!(null),
            json!(false),
            json!(true),
            json!(-3),
            json!(2.5),
            json!(10),
            json!("a"),
            json!("b"),
            json!([]),
            json!(["a"]),
            json!({}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                compare_json(&pair[0], &pair[1]),
                Ordering::Less,
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_type_id_view_range() {
        let start = json!(["car", 0]);
        let end = json!(["car", {}]);
        let key = json!(["car", 42]);
        let other = json!(["car_class", 1]);

        assert_eq!(compare_json(&start, &key), Ordering::Less);
        assert_eq!(compare_json(&key, &end), Ordering::Less);
        assert_eq!(compare_json(&end, &other), Ordering::Less);
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(compare_json(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_json(&json!(2.0), &json!(2)), Ordering::Equal);
    }
}
