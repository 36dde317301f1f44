//! # forge-oracle
//!
//! The generation-oracle boundary of the forge engine.
//!
//! The oracle is an opaque capability: given a [`ContextBundle`] (spec,
//! schema, prior code, feedback, import pool, accumulated reflections) it
//! returns generated source text. The only guarantee on output format is
//! the `### <path>` header convention for multi-file responses, handled by
//! [`split_response`].
//!
//! Implement [`GenerationOracle`] to plug in a concrete provider; tests use
//! scripted mocks.

mod error;
mod split;
mod traits;

pub use error::OracleError;
pub use split::{split_response, GeneratedFile};
pub use traits::{ContextBundle, GenerationOracle};
