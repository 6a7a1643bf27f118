#![forbid(unsafe_code)]

//! XML Digital Signature for the Ulriksdal XML security library.
//!
//! The signature model ([`Signature`], [`SignedInfo`], [`Reference`],
//! [`DataObject`]) round-trips through XML. [`SignedXml`] computes and
//! checks it against a document under the policy of a [`DsigContext`].

pub mod context;
pub mod reference;
pub mod signature;
pub mod signed_info;
pub mod signed_xml;

pub use context::{DsigContext, FormatValidator, IdElementHook};
pub use reference::Reference;
pub use signature::{DataObject, Signature};
pub use signed_info::SignedInfo;
pub use signed_xml::{find_signatures, uses_truncated_hmac, SignedXml, VerifyFailure, VerifyResult};
