// Comparison semantics for dynamic document values.
//
// Documents carry loosely-typed `serde_json::Value` fields, so the query
// engine needs its own notion of loose equality (numeric coercion across
// integer/float/numeric-string representations) alongside strict value
// equality, plus a total ordering usable for `>`/`<` predicates and sorting.

use serde_json::Value;
use std::cmp::Ordering;

/// Loose equality: numbers compare numerically regardless of integer/float
/// representation, and a numeric string compares equal to the number it
/// parses to. Arrays and objects compare loosely element-wise. Values of
/// otherwise unrelated types are never loosely equal.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|w| loose_eq(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

/// Total ordering over values: null < bool < number < string < array < object,
/// with natural ordering within each type. Missing fields resolve to null and
/// therefore sort first.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                let ord = compare(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                let ord = ka.cmp(kb).then_with(|| compare(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Canonical string form of a value, used as the bucket key in hash indexes
/// and as the key in `ResultSet::hash`. Whole-number floats normalize to the
/// integer spelling so that `1`, `1.0` and `"1"` share a bucket, mirroring
/// the loose-equality rules used on the full-scan path.
pub(crate) fn key_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loose_eq_numeric_coercion() {
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(loose_eq(&json!(1), &json!("1")));
        assert!(loose_eq(&json!("2.5"), &json!(2.5)));
        assert!(!loose_eq(&json!(""), &json!(1)));
        assert!(!loose_eq(&json!(true), &json!(1)));
    }

    #[test]
    fn test_loose_eq_collections() {
        assert!(loose_eq(&json!([1, "2"]), &json!([1.0, 2])));
        assert!(!loose_eq(&json!([1]), &json!([1, 2])));
        assert!(loose_eq(&json!({"a": 1}), &json!({"a": "1"})));
    }

    #[test]
    fn test_compare_within_types() {
        assert_eq!(compare(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(compare(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare(&json!("a"), &json!("b")), Ordering::Less);
        assert_eq!(compare(&json!(false), &json!(true)), Ordering::Less);
    }

    #[test]
    fn test_compare_null_sorts_first() {
        assert_eq!(compare(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare(&Value::Null, &json!("")), Ordering::Less);
        assert_eq!(compare(&Value::Null, &json!(false)), Ordering::Less);
    }

    #[test]
    fn test_key_string_normalizes_numbers() {
        assert_eq!(key_string(&json!(1)), "1");
        assert_eq!(key_string(&json!(1.0)), "1");
        assert_eq!(key_string(&json!("1")), "1");
        assert_eq!(key_string(&json!(2.5)), "2.5");
        assert_eq!(key_string(&json!(true)), "true");
        assert_eq!(key_string(&Value::Null), "null");
    }
}
