//! Totally ordered JSON values.
//!
//! Wire payloads carry arbitrary JSON (integers in practice, but nothing
//! forbids strings or arrays). `serde_json::Value` has no `Ord`, so set
//! elements and map keys are wrapped in [`Datum`], which orders values by
//! kind first (null < bool < number < string < array < object) and then
//! structurally within a kind.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

/// An opaque JSON value with a total order consistent with equality.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datum(Value);

impl Datum {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Datum> for Value {
    fn from(datum: Datum) -> Self {
        datum.0
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_values(&self.0, &other.0)
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => cmp_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match cmp_values(x, y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                }
            }
            xs.len().cmp(&ys.len())
        }
        (Value::Object(xs), Value::Object(ys)) => {
            // serde_json maps iterate in key order
            for ((kx, vx), (ky, vy)) in xs.iter().zip(ys) {
                match kx.cmp(ky).then_with(|| cmp_values(vx, vy)) {
                    Ordering::Equal => continue,
                    ord => return ord,
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

/// Integers compare exactly. Anything involving a float compares by
/// magnitude, with integers sorting before floats of equal magnitude so that
/// `1` and `1.0` (unequal as `Value`s) stay distinct.
fn cmp_numbers(a: &Number, b: &Number) -> Ordering {
    match (int_key(a), int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (x, y) => {
            let fx = a.as_f64().unwrap_or_default();
            let fy = b.as_f64().unwrap_or_default();
            fx.partial_cmp(&fy)
                .unwrap_or(Ordering::Equal)
                .then_with(|| x.is_none().cmp(&y.is_none()))
        }
    }
}

fn int_key(n: &Number) -> Option<i128> {
    n.as_u64()
        .map(i128::from)
        .or_else(|| n.as_i64().map(i128::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(v: Value) -> Datum {
        Datum::from(v)
    }

    #[test]
    fn test_orders_kinds_before_contents() {
        let mut items = vec![
            d(json!({"a": 1})),
            d(json!("x")),
            d(json!(3)),
            d(json!([1])),
            d(json!(null)),
            d(json!(true)),
        ];
        items.sort();
        let kinds: Vec<u8> = items.iter().map(|i| kind_rank(i.as_value())).collect();
        assert_eq!(kinds, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(d(json!(-5)) < d(json!(2)));
        assert!(d(json!(2)) < d(json!(10)));
        assert!(d(json!(u64::MAX)) > d(json!(i64::MAX)));
        assert!(d(json!(1.5)) < d(json!(2)));
        assert_eq!(d(json!(7)).cmp(&d(json!(7))), Ordering::Equal);
    }

    #[test]
    fn test_int_and_float_of_same_magnitude_are_distinct() {
        let int = d(json!(1));
        let float = d(json!(1.0));
        assert_ne!(int, float);
        assert_eq!(int.cmp(&float), Ordering::Less);
        assert_eq!(float.cmp(&int), Ordering::Greater);
    }

    #[test]
    fn test_arrays_compare_lexicographically() {
        assert!(d(json!([1, 2])) < d(json!([1, 3])));
        assert!(d(json!([1, 2])) < d(json!([1, 2, 0])));
    }

    #[test]
    fn test_serializes_transparently() {
        let datum = d(json!(["k", 3]));
        assert_eq!(serde_json::to_string(&datum).unwrap(), r#"["k",3]"#);
        let back: Datum = serde_json::from_str("42").unwrap();
        assert_eq!(back, d(json!(42)));
    }
}
