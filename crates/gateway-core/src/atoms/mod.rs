//! Pure data types, errors, and constants.
//!
//! Atoms may only depend on std and external pure crates (serde, chrono,
//! thiserror, uuid). Nothing here may import from `engine::`.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{DispatchError, GatewayError, UpstreamError, UpstreamErrorKind};
pub use types::*;
