#![forbid(unsafe_code)]

//! Enveloped signature transform.
//!
//! Removes one `ds:Signature` subtree from the node set. The signature is
//! identified by its 1-based position among the document's `ds:Signature`
//! elements, which the signing engine fills in for the signature being
//! processed.

use tracing::debug;
use ulriksdal_core::{ns, Result};
use ulriksdal_xml::XmlDocument;

use crate::pipeline::TransformData;

pub(crate) fn remove_signature(input: TransformData, position: usize) -> Result<TransformData> {
    let (document, mut nodes) = input.into_node_set()?;
    if position > 0 {
        let doc = document.parse_doc()?;
        match XmlDocument::find_elements(&doc, ns::DSIG, ns::node::SIGNATURE).get(position - 1) {
            Some(sig) => nodes.remove_subtree(*sig),
            None => debug!(position, "no signature at enveloped position, nothing removed"),
        }
    }
    Ok(TransformData::NodeSet { document, nodes })
}
