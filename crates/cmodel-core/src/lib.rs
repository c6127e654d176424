//! cmodel Core
//!
//! Model types, configuration and errors shared by the cmodel parser and
//! the tools that consume its output.

pub mod config;
pub mod error;
pub mod model;

pub use config::Config;
pub use error::{Error, Result};
pub use model::*;
