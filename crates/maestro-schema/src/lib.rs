//! Advisory Q&A schemas for worker agents.
//!
//! Worker question and answer schemas are descriptive, not prescriptive:
//! they guide the orchestrator and worker models but never hard-reject a
//! mismatch. Matching fields are extracted with best-effort type coercion,
//! extra fields are preserved, and missing required fields produce warnings
//! rather than errors. Nothing in this crate returns `Err`; findings are
//! data.

mod compact;
mod extract;
mod validate;

pub use compact::{CompactSchema, FieldSpec};
pub use extract::extract_json;
pub use validate::{answer_from_validation, soft_validate, Validation};
