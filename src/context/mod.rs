// src/context/mod.rs

//! Run context and templating.
//!
//! - [`run_context`] holds the logical date of one DAG run and the values
//!   derived from it.
//! - [`template`] parses `{{ token }}` templates and renders them against a
//!   [`RunContext`].

pub mod run_context;
pub mod template;

pub use run_context::{RunContext, RunKind, date_range};
pub use template::{Template, TemplateToken};
