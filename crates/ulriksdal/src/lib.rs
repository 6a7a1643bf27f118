#![forbid(unsafe_code)]

//! Ulriksdal: XML Digital Signature and XML Encryption.
//!
//! This crate gathers the workspace crates under one name. Signing and
//! verification live in [`dsig`], encryption and decryption in [`enc`].

pub use ulriksdal_c14n as c14n;
pub use ulriksdal_core as core;
pub use ulriksdal_crypto as crypto;
pub use ulriksdal_dsig as dsig;
pub use ulriksdal_enc as enc;
pub use ulriksdal_keys as keys;
pub use ulriksdal_transforms as transforms;
pub use ulriksdal_xml as xml;

pub use ulriksdal_core::{Error, Result};
