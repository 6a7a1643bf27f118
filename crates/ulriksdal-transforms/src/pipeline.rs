#![forbid(unsafe_code)]

//! Values flowing through a transform chain and the chain itself.
//!
//! Each value is tagged with one of three runtime types. When a transform
//! does not accept the current type, the chain coerces it:
//!
//! | current            | transform accepts | coercion                        |
//! |--------------------|-------------------|---------------------------------|
//! | stream             | document          | parse                           |
//! | node-set, document | stream            | C14N 1.0 without comments       |
//!
//! Anything else is [`Error::InvalidInputType`]. After the last transform a
//! non-stream value is canonicalized the same way.

use std::io::Write;

use tracing::debug;
use ulriksdal_c14n::C14nMode;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_xml::{NodeSet, XmlDocument, XmlWriter};

use crate::decrypt::DocumentDecryptor;
use crate::transform::Transform;
use crate::xslt::XsltProcessor;

/// Runtime type of a [`TransformData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    ByteStream,
    NodeSet,
    Document,
}

/// Data flowing through the transform pipeline.
#[derive(Debug, Clone)]
pub enum TransformData {
    /// Raw octets.
    Stream(Vec<u8>),
    /// A subset of a document's nodes. Node ids index into `document`.
    NodeSet {
        document: XmlDocument,
        nodes: NodeSet,
    },
    /// A whole parsed document.
    Document(XmlDocument),
}

impl TransformData {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Stream(_) => DataType::ByteStream,
            Self::NodeSet { .. } => DataType::NodeSet,
            Self::Document(_) => DataType::Document,
        }
    }

    /// Write the octets this value stands for: the bytes themselves, or
    /// the inclusive canonical form without comments.
    pub fn write_octets<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        match self {
            Self::Stream(bytes) => out.write_all(bytes).map_err(Error::from),
            Self::NodeSet { document, nodes } => {
                let doc = document.parse_doc()?;
                ulriksdal_c14n::canonicalize_to(&doc, C14nMode::Inclusive, Some(nodes), &[], out)
            }
            Self::Document(document) => {
                let doc = document.parse_doc()?;
                ulriksdal_c14n::canonicalize_to(&doc, C14nMode::Inclusive, None, &[], out)
            }
        }
    }

    pub fn into_stream(self) -> Result<Vec<u8>> {
        match self {
            Self::Stream(bytes) => Ok(bytes),
            other => {
                let mut out = Vec::new();
                other.write_octets(&mut out)?;
                Ok(out)
            }
        }
    }

    /// The document behind a node-set or document value, or the parsed stream.
    pub fn into_document(self) -> Result<XmlDocument> {
        match self {
            Self::Stream(bytes) => XmlDocument::parse_bytes(&bytes),
            Self::NodeSet { document, .. } | Self::Document(document) => Ok(document),
        }
    }

    /// A node-set view: documents become the set of all their nodes and
    /// streams are parsed first.
    pub fn into_node_set(self) -> Result<(XmlDocument, NodeSet)> {
        match self {
            Self::NodeSet { document, nodes } => Ok((document, nodes)),
            other => {
                let document = other.into_document()?;
                let nodes = NodeSet::all(&document.parse_doc()?);
                Ok((document, nodes))
            }
        }
    }
}

/// Caller-supplied engines used by individual transforms.
#[derive(Clone, Copy, Default)]
pub struct TransformContext<'a> {
    /// Decrypts `EncryptedData` for the decryption and license transforms.
    pub decryptor: Option<&'a dyn DocumentDecryptor>,
    /// Runs stylesheets for the XSLT transform.
    pub xslt: Option<&'a dyn XsltProcessor>,
}

impl std::fmt::Debug for TransformContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformContext")
            .field("decryptor", &self.decryptor.is_some())
            .field("xslt", &self.xslt.is_some())
            .finish()
    }
}

/// Bring `data` to a type in `accepts`, following the chain's coercion table.
pub fn coerce(data: TransformData, accepts: &[DataType]) -> Result<TransformData> {
    let current = data.data_type();
    if accepts.contains(&current) {
        return Ok(data);
    }
    match current {
        DataType::ByteStream if accepts.contains(&DataType::Document) => {
            debug!("coercing stream to document");
            Ok(TransformData::Document(data.into_document()?))
        }
        DataType::NodeSet | DataType::Document if accepts.contains(&DataType::ByteStream) => {
            debug!(from = ?current, "coercing to stream via C14N");
            Ok(TransformData::Stream(data.into_stream()?))
        }
        _ => Err(Error::InvalidInputType(format!(
            "{current:?} cannot be coerced to any of {accepts:?}"
        ))),
    }
}

/// An ordered sequence of transforms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transform: Transform) {
        self.transforms.push(transform);
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut [Transform] {
        &mut self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run every transform in order, coercing between them. The result may
    /// be of any type.
    pub fn execute(&self, input: TransformData, ctx: &TransformContext<'_>) -> Result<TransformData> {
        let mut data = input;
        for transform in &self.transforms {
            data = coerce(data, transform.input_types())?;
            debug!(transform = transform.uri(), input = ?data.data_type(), "applying transform");
            data = transform.execute(data, ctx)?;
        }
        Ok(data)
    }

    /// Run the chain and canonicalize whatever comes out into octets.
    pub fn transform_to_octet_stream(
        &self,
        input: TransformData,
        ctx: &TransformContext<'_>,
    ) -> Result<Vec<u8>> {
        self.execute(input, ctx)?.into_stream()
    }

    /// Parse a `<ds:Transforms>` element.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let transforms = node
            .children()
            .filter(|c| c.is_element())
            .map(|c| {
                if c.tag_name().namespace() != Some(ns::DSIG)
                    || c.tag_name().name() != ns::node::TRANSFORM
                {
                    return Err(Error::XmlStructure(format!(
                        "unexpected {} inside Transforms",
                        c.tag_name().name()
                    )));
                }
                Transform::load_xml(c)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { transforms })
    }

    /// Write `<Transforms>` in the ambient (dsig default) namespace. Writes
    /// nothing for an empty chain.
    pub fn write_xml(&self, w: &mut XmlWriter) {
        if self.transforms.is_empty() {
            return;
        }
        w.start_element(ns::node::TRANSFORMS, &[]);
        for t in &self.transforms {
            t.write_xml(w);
        }
        w.end_element(ns::node::TRANSFORMS);
    }
}
