#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Core types, configuration and document loading for the lesson-material
//! retrieval engine.

pub mod config;
pub mod embed;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod tokens;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
