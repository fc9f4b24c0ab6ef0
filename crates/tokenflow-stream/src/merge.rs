//! Chunk merging.
//!
//! Streamed output arrives as partial chunks: text fragments, token counters,
//! lists of tool-call deltas, or JSON records carrying any mix of those.
//! [`Merge`] combines two chunks of the same category into one so that a
//! stream of partials can be folded into a running accumulation.
//!
//! | Category          | Rule                                                   |
//! |-------------------|--------------------------------------------------------|
//! | ordered sequence  | `a` followed by `b`, no deduplication                  |
//! | string            | concatenation                                          |
//! | number            | arithmetic sum                                         |
//! | keyed record      | shallow copy of `a`; shared non-array keys merge recursively, every other key from `b` overwrites |
//!
//! Any other pairing fails with [`StreamError::MergeType`].

use serde_json::{Map, Number, Value};

use crate::error::{Result, StreamError};

/// Associative combination of two partial chunks.
pub trait Merge: Sized {
    /// Combine `self` (the accumulation so far) with `other` (the next chunk).
    fn merge(self, other: Self) -> Result<Self>;
}

impl Merge for String {
    fn merge(mut self, other: Self) -> Result<Self> {
        self.push_str(&other);
        Ok(self)
    }
}

impl<T> Merge for Vec<T> {
    fn merge(mut self, other: Self) -> Result<Self> {
        self.extend(other);
        Ok(self)
    }
}

// Integer sums saturate at the type's bounds, as JSON number sums do.
macro_rules! impl_merge_for_integer {
    ($($ty:ty),*) => {
        $(
            impl Merge for $ty {
                fn merge(self, other: Self) -> Result<Self> {
                    Ok(self.saturating_add(other))
                }
            }
        )*
    };
}

macro_rules! impl_merge_for_float {
    ($($ty:ty),*) => {
        $(
            impl Merge for $ty {
                fn merge(self, other: Self) -> Result<Self> {
                    Ok(self + other)
                }
            }
        )*
    };
}

impl_merge_for_integer!(i32, i64, u32, u64, usize);
impl_merge_for_float!(f32, f64);

impl Merge for Value {
    fn merge(self, other: Self) -> Result<Self> {
        merge_values(self, other)
    }
}

/// Merge two JSON values according to the category rules above.
pub fn merge_values(first: Value, second: Value) -> Result<Value> {
    match (first, second) {
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(add_numbers(&a, &b))),
        (Value::Object(a), Value::Object(b)) => merge_records(a, b).map(Value::Object),
        (a, b) => Err(StreamError::MergeType {
            left: category(&a),
            right: category(&b),
        }),
    }
}

fn merge_records(mut chunk: Map<String, Value>, second: Map<String, Value>) -> Result<Map<String, Value>> {
    for (key, value) in second {
        match chunk.remove(&key) {
            Some(existing) if !existing.is_array() => {
                let merged = merge_values(existing, value)?;
                chunk.insert(key, merged);
            }
            _ => {
                chunk.insert(key, value);
            }
        }
    }
    Ok(chunk)
}

/// Sum two JSON numbers, staying integral while both sides are integers and
/// the sum does not overflow.
fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Number::from(sum);
        }
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        if let Some(sum) = x.checked_add(y) {
            return Number::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    // Non-finite sums have no JSON representation; saturate instead.
    Number::from_f64(sum).unwrap_or_else(|| {
        Number::from_f64(if sum.is_sign_negative() { f64::MIN } else { f64::MAX })
            .unwrap_or_else(|| Number::from(0))
    })
}

/// Human-readable category name used in merge errors.
fn category(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Fold `chunks` left to right.  Returns `None` when `chunks` is empty.
pub fn merge_all<T, I>(chunks: I) -> Result<Option<T>>
where
    T: Merge,
    I: IntoIterator<Item = T>,
{
    let mut acc: Option<T> = None;
    for chunk in chunks {
        acc = Some(match acc {
            None => chunk,
            Some(prev) => prev.merge(chunk)?,
        });
    }
    Ok(acc)
}
