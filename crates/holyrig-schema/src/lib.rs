//! holyrig-schema: the schema DSL and model file compilers.
//!
//! Radios are described entirely as data. A *schema* declares the command
//! surface of a class of radios (enums, command signatures, the status
//! vector) in a small block-syntax DSL. A *model* implements a schema for
//! one concrete radio in TOML: enum wire values, init frames, command frame
//! templates, and status polls.
//!
//! Both compilers report errors with source positions and rendered caret
//! context ([`Diagnostic`]), and both validate eagerly so the runtime only
//! ever sees well-formed [`FrameTemplate`](holyrig_codec::FrameTemplate)s.

pub mod diag;
pub mod lexer;
pub mod model;
pub mod schema;

pub use diag::{Diagnostic, Diagnostics, SourcePos};
pub use model::Model;
pub use schema::{Schema, Signature};

/// Compile a schema source. See [`schema::compile`].
pub fn compile_schema(source: &str) -> Result<Schema, Diagnostics> {
    schema::compile(source)
}

/// Compile a model source against a schema. See [`model::compile`].
pub fn compile_model(
    source: &str,
    schema: &std::sync::Arc<Schema>,
) -> Result<Model, Diagnostics> {
    model::compile(source, schema)
}
