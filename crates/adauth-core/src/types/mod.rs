//! Core types for adauth

mod principal;
mod record;

pub use principal::*;
pub use record::*;
