//! Configuration module
//!
//! Class presets, the race file schema, loading and validation.

pub mod loader;
pub mod presets;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, LoadResult, LoaderOptions};
pub use presets::ClassPreset;
pub use schema::*;
pub use validation::{ValidationResult, Validator};
