//! Check validation: canonicalization and structural comparison.
//!
//! Query results can contain service-native scalars (UUIDs) that a suite
//! document cannot express directly. Cells are canonicalized by column type
//! through `ScalarEncoder`s, then the whole result is compared against the
//! expectation structurally.

use crate::clickhouse::{Column, QueryRows};
use crate::errors::SqlTestError;
use crate::suite::Check;
use serde_json::{Number, Value};
use uuid::Uuid;

/// Maps one kind of service-native scalar to its canonical form.
///
/// Encoding must be idempotent: an already canonical value is returned
/// unchanged.
pub trait ScalarEncoder: Send + Sync {
    /// Whether this encoder handles the (unwrapped) ClickHouse type.
    fn handles(&self, scalar_type: &str) -> bool;

    fn encode(&self, value: Value) -> Value;
}

/// Renders `UUID` cells as 32 lowercase hex digits without hyphens.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidEncoder;

impl ScalarEncoder for UuidEncoder {
    fn handles(&self, scalar_type: &str) -> bool {
        scalar_type == "UUID"
    }

    fn encode(&self, value: Value) -> Value {
        match &value {
            Value::String(s) => match Uuid::parse_str(s) {
                Ok(uuid) => Value::String(uuid.simple().to_string()),
                Err(_) => value,
            },
            _ => value,
        }
    }
}

/// Canonicalizes query rows into the value model of suite documents.
pub struct Canonicalizer {
    encoders: Vec<Box<dyn ScalarEncoder>>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(vec![Box::new(UuidEncoder)])
    }
}

impl Canonicalizer {
    pub fn new(encoders: Vec<Box<dyn ScalarEncoder>>) -> Self {
        Self { encoders }
    }

    /// Canonicalize every cell and return the rows as a JSON array of arrays.
    pub fn canonicalize(&self, rows: QueryRows) -> Value {
        let QueryRows { columns, rows } = rows;

        Value::Array(
            rows.into_iter()
                .map(|row| {
                    Value::Array(
                        row.into_iter()
                            .enumerate()
                            .map(|(i, cell)| match columns.get(i) {
                                Some(column) => self.encode_cell(column, cell),
                                None => cell,
                            })
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    fn encode_cell(&self, column: &Column, cell: Value) -> Value {
        self.encode_typed(&column.type_name, cell)
    }

    fn encode_typed(&self, type_name: &str, value: Value) -> Value {
        let type_name = type_name.trim();

        if let Some(inner) = unwrap_type(type_name, "Nullable")
            .or_else(|| unwrap_type(type_name, "LowCardinality"))
        {
            return self.encode_typed(inner, value);
        }

        if let Some(inner) = unwrap_type(type_name, "Array") {
            return match value {
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| self.encode_typed(inner, item))
                        .collect(),
                ),
                other => other,
            };
        }

        if value.is_null() {
            return value;
        }

        match self.encoders.iter().find(|e| e.handles(type_name)) {
            Some(encoder) => encoder.encode(value),
            None => value,
        }
    }
}

/// `Wrapper(Inner)` -> `Inner`.
fn unwrap_type<'a>(type_name: &'a str, wrapper: &str) -> Option<&'a str> {
    type_name
        .strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Deep structural equality between an expected and an actual value.
///
/// Sequences compare element-wise in order, mappings by exact key set and
/// per-key equality, numbers by numeric value (`1 == 1.0`). `true` and
/// `false` equal the numbers 1 and 0.
pub fn structurally_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Bool(flag), Value::Number(n)) | (Value::Number(n), Value::Bool(flag)) => {
            numbers_equal(n, &Number::from(u8::from(*flag)))
        }
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| structurally_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| structurally_equal(x, y)))
        }
        _ => false,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (as_integer(a), as_integer(b)) {
        (Some(x), Some(y)) => x == y,
        (Some(x), None) => b.as_f64().is_some_and(|f| float_is_integer(f, x)),
        (None, Some(y)) => a.as_f64().is_some_and(|f| float_is_integer(f, y)),
        (None, None) => matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y),
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Exact comparison: the float must hold an integral value equal to `i`,
/// so large integers never round onto a neighbouring float.
fn float_is_integer(f: f64, i: i128) -> bool {
    f.is_finite() && f.fract() == 0.0 && f as i128 == i
}

/// Runs checks and compares their results.
#[derive(Default)]
pub struct Validator {
    canonicalizer: Canonicalizer,
}

impl Validator {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    /// Compare canonicalized `rows` against `check.expected`.
    pub fn validate(&self, check: &Check, rows: QueryRows) -> Result<(), SqlTestError> {
        let actual = self.canonicalizer.canonicalize(rows);

        if structurally_equal(&check.expected, &actual) {
            return Ok(());
        }

        Err(SqlTestError::AssertionMismatch {
            query: check.query.clone(),
            expected: check.expected.clone(),
            actual,
        })
    }
}
