//! Built-in stage types.
//!
//! | tag             | role |
//! |-----------------|------|
//! | `row_generator` | source; emits `rows` rows of `(id, name)` per copy |
//! | `passthrough`   | forwards every row unchanged |
//! | `discard`       | sink; counts rows as output and drops them |
//! | `reject_filter` | sends every `reject_every`-th key to the error output |

use std::str::FromStr;

use super::context::StageContext;
use super::error::StageError;
use super::{ProcessOutcome, Stage};
use crate::graph::StageNode;
use crate::row::{Row, RowMeta, Value, ValueType};

fn parse_property<T: FromStr>(node: &StageNode, key: &str, default: T) -> Result<T, StageError> {
    match node.property(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| StageError::invalid_property(key, format!("cannot parse '{raw}'"))),
    }
}

/// Emits a fixed number of generated rows, one per call.
///
/// Properties: `rows` (default 10, or `unbounded`) and `start` (first id,
/// default 0). Every copy emits the full sequence.
#[derive(Debug, Clone)]
pub struct RowGenerator {
    next: i64,
    remaining: Option<u64>,
}

impl RowGenerator {
    /// Type tag.
    pub const TYPE: &'static str = "row_generator";

    /// Creates a generator of `rows` rows starting at id `start`.
    /// `None` generates until the run stops.
    #[must_use]
    pub fn new(start: i64, rows: Option<u64>) -> Self {
        Self {
            next: start,
            remaining: rows,
        }
    }

    /// Reads the `rows` and `start` properties of `node`.
    ///
    /// # Errors
    ///
    /// Returns `StageError::InvalidProperty` for malformed values.
    pub fn from_node(node: &StageNode) -> Result<Self, StageError> {
        let rows = match node.property("rows") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("unbounded") => None,
            _ => Some(parse_property(node, "rows", 10u64)?),
        };
        let start = parse_property(node, "start", 0i64)?;
        Ok(Self::new(start, rows))
    }

    /// Layout of the generated rows.
    #[must_use]
    pub fn fields() -> RowMeta {
        RowMeta::new()
            .with_field("id", ValueType::Integer)
            .with_field("name", ValueType::String)
    }
}

impl Stage for RowGenerator {
    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        if ctx.is_stopped() {
            return Ok(ProcessOutcome::Done);
        }
        match &mut self.remaining {
            Some(0) => return Ok(ProcessOutcome::Done),
            Some(n) => *n -= 1,
            None => {}
        }
        let id = self.next;
        self.next += 1;
        ctx.put_row(Row::new(vec![Value::Integer(id), Value::from(format!("row-{id}"))]))?;
        if self.remaining == Some(0) {
            Ok(ProcessOutcome::Done)
        } else {
            Ok(ProcessOutcome::Continue)
        }
    }

    fn supports_cooperative(&self) -> bool {
        true
    }
}

/// Forwards every row unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Passthrough {
    /// Type tag.
    pub const TYPE: &'static str = "passthrough";
}

impl Stage for Passthrough {
    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        match ctx.get_row() {
            Some(row) => {
                ctx.put_row(row)?;
                Ok(ProcessOutcome::Continue)
            }
            None => Ok(ctx.outcome_when_idle()),
        }
    }

    fn supports_cooperative(&self) -> bool {
        true
    }
}

/// Consumes rows without forwarding them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Discard {
    /// Type tag.
    pub const TYPE: &'static str = "discard";
}

impl Stage for Discard {
    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        match ctx.get_row() {
            Some(_) => {
                ctx.inc_lines_output();
                Ok(ProcessOutcome::Continue)
            }
            None => Ok(ctx.outcome_when_idle()),
        }
    }

    fn supports_cooperative(&self) -> bool {
        true
    }
}

/// Sends rows whose integer key is a multiple of `reject_every` to the
/// error output and forwards the rest.
///
/// Properties: `field` (key column name, resolved against the upstream
/// layout; default: column 0) and `reject_every` (default 0, never).
#[derive(Debug, Clone)]
pub struct RejectFilter {
    field: Option<String>,
    key_index: usize,
    reject_every: i64,
}

impl RejectFilter {
    /// Type tag.
    pub const TYPE: &'static str = "reject_filter";

    /// Reads the `field` and `reject_every` properties of `node`.
    ///
    /// # Errors
    ///
    /// Returns `StageError::InvalidProperty` for a malformed or negative
    /// `reject_every`.
    pub fn from_node(node: &StageNode) -> Result<Self, StageError> {
        let reject_every = parse_property(node, "reject_every", 0i64)?;
        if reject_every < 0 {
            return Err(StageError::invalid_property("reject_every", "must not be negative"));
        }
        Ok(Self {
            field: node.property("field").map(str::to_string),
            key_index: 0,
            reject_every,
        })
    }
}

impl Stage for RejectFilter {
    fn init(&mut self, ctx: &mut StageContext) -> Result<(), StageError> {
        if let Some(field) = &self.field {
            self.key_index = ctx
                .input_fields()
                .and_then(|meta| meta.index_of(field))
                .ok_or_else(|| {
                    StageError::invalid_property("field", format!("unknown input field '{field}'"))
                })?;
        }
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StageContext) -> Result<ProcessOutcome, StageError> {
        let Some(row) = ctx.get_row() else {
            return Ok(ctx.outcome_when_idle());
        };
        let key = row.get(self.key_index).and_then(Value::as_integer);
        match key {
            Some(k) if self.reject_every > 0 && k % self.reject_every == 0 => {
                let field = self.field.as_deref().unwrap_or("");
                ctx.put_error(&row, 1, "rejected by filter", field, "REJECTED")?;
            }
            _ => ctx.put_row(row)?,
        }
        Ok(ProcessOutcome::Continue)
    }

    fn supports_cooperative(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_properties() {
        let node = StageNode::new("g", RowGenerator::TYPE)
            .with_property("rows", "3")
            .with_property("start", "100");
        let generator = RowGenerator::from_node(&node).unwrap();
        assert_eq!(generator.next, 100);
        assert_eq!(generator.remaining, Some(3));

        let unbounded =
            RowGenerator::from_node(&node.clone().with_property("rows", "unbounded")).unwrap();
        assert_eq!(unbounded.remaining, None);

        assert_eq!(RowGenerator::fields().index_of("name"), Some(1));
    }

    #[test]
    fn test_reject_filter_properties() {
        let node = StageNode::new("f", RejectFilter::TYPE).with_property("reject_every", "-2");
        assert!(matches!(
            RejectFilter::from_node(&node),
            Err(StageError::InvalidProperty { .. })
        ));
        let node = StageNode::new("f", RejectFilter::TYPE)
            .with_property("reject_every", "3")
            .with_property("field", "id");
        let filter = RejectFilter::from_node(&node).unwrap();
        assert_eq!(filter.reject_every, 3);
        assert_eq!(filter.field.as_deref(), Some("id"));
    }

    #[test]
    fn test_builtins_are_cooperative() {
        assert!(Passthrough.supports_cooperative());
        assert!(Discard.supports_cooperative());
        assert!(RowGenerator::new(0, Some(1)).supports_cooperative());
    }
}
