//! Core types shared across devflow: error definitions and user-facing error rendering.

pub mod error;

pub use error::{DevflowError, ErrorContext, user_friendly_error};
