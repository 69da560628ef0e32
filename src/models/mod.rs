//! Data models for the POS offline cache.
//!
//! Field names follow the client's camelCase JSON so cached records round-trip unchanged.

mod record;
mod view;

pub use record::*;
pub use view::*;
