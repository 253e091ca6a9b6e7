#![doc = "Common types shared across the bloatfuzz workspace."]

pub mod config;
pub mod ctype;
pub mod error;

pub use config::*;
pub use ctype::*;
pub use error::*;
