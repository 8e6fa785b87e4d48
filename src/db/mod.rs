//! Document shapes exchanged with the external exam store.

pub mod models;
pub mod types;
