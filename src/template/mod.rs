//! Template compilation and resolution.
//!
//! A template is a per-detail-type blueprint describing how to compute record
//! fields from an event's payload. Fields are either literals or restricted
//! `{{dotted.path}}` expressions compiled once at configuration load.

mod expr;
mod field;
mod resolver;

pub use expr::{CompiledExpr, ExprError};
pub use field::FieldValue;
pub use resolver::{record_id, resolve, CompiledTemplate, TargetSpec, TemplateError};

pub(crate) use expr::lookup_dotted;
