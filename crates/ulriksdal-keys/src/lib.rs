#![forbid(unsafe_code)]

//! Keys, key managers and `KeyInfo` handling for the ulriksdal XML Security library.
//!
//! Keys load from PEM, DER and raw binary. A `KeysManager` holds named keys
//! and trusted certificates; a `KeyResolver` turns a `<ds:KeyInfo>` into
//! candidate keys.

pub mod key;
pub mod keyinfo;
pub mod loader;
pub mod manager;
pub mod resolve;
pub mod x509;

pub use key::{Key, KeyData, KeyUsage};
pub use keyinfo::{DsaKeyValue, KeyInfo, KeyInfoClause, RsaKeyValue, X509Data, X509IssuerSerial};
pub use manager::KeysManager;
pub use resolve::{EncryptedKeyResolver, IdLookup, KeyResolver, DEFAULT_MAX_DEPTH};
