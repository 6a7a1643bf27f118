#![forbid(unsafe_code)]

//! Shared vocabulary for the ulriksdal XML Security crates: algorithm
//! identifiers, namespace and element names, and the error taxonomy.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, ErrorKind, Result};
