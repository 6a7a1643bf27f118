#![forbid(unsafe_code)]

//! XPath filter transform.

use std::collections::BTreeMap;

use ulriksdal_core::Result;
use ulriksdal_xml::xpath::XPathExpr;

use crate::pipeline::TransformData;

/// Keep the nodes of the input for which `expression` evaluates to true.
pub(crate) fn filter(
    input: TransformData,
    expression: &str,
    namespaces: &BTreeMap<String, String>,
) -> Result<TransformData> {
    let expr = XPathExpr::compile(expression, namespaces)?;
    let (document, mut nodes) = input.into_node_set()?;
    {
        let doc = document.parse_doc()?;
        nodes.retain(&doc, |n| expr.evaluate(n));
    }
    Ok(TransformData::NodeSet { document, nodes })
}
