#![forbid(unsafe_code)]

//! Reference transforms for the Ulriksdal XML security library.
//!
//! Each reference of a signature carries a chain of transforms applied in
//! order to the data its URI selects. Values in the chain are streams,
//! node sets or documents; the chain converts between them where a
//! transform needs a different type (see [`pipeline`]).

mod base64_transform;
pub mod decrypt;
mod enveloped;
mod license;
pub mod pipeline;
pub mod transform;
pub mod uri;
mod xpath_filter;
pub mod xslt;

pub use decrypt::{decrypt_document_with, DocumentDecryptor};
pub use pipeline::{coerce, DataType, TransformChain, TransformContext, TransformData};
pub use transform::{read_inclusive_prefixes, Transform};
pub use uri::ReferenceUri;
pub use xslt::XsltProcessor;
