#![forbid(unsafe_code)]

//! XML Encryption (XML-Enc) for the Ulriksdal XML security library.
//!
//! [`EncryptedXml`] encrypts elements or element content under a random
//! session key, wraps that key for a recipient, and decrypts every
//! `EncryptedData` of a document in place. It also implements the
//! transform layer's [`ulriksdal_transforms::DocumentDecryptor`], so it
//! can back the XML decryption transform inside a signature.

pub mod cipher_data;
pub mod context;
mod decrypt;
mod encrypt;
pub mod encrypted_type;
pub mod encrypted_xml;

pub use cipher_data::{CipherData, CipherReference};
pub use context::EncContext;
pub use encrypted_type::{
    EncryptedData, EncryptedKey, EncryptedReference, EncryptedType, EncryptionMethod,
    EncryptionProperty, ReferenceKind,
};
pub use encrypted_xml::{EncryptedXml, RecipientKey};
