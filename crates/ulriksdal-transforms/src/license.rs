#![forbid(unsafe_code)]

//! MPEG-21 REL license transform.
//!
//! A license signs itself from inside its `r:issuer` element, so the
//! issuer's `ds:Signature` children are dropped from the node set. Grants
//! carried as `r:encryptedGrant` are decrypted in place first, which
//! needs a decryptor in the transform context.

use ulriksdal_core::{ns, Error, Result};
use ulriksdal_xml::document::{find_child_elements, is_element_named};
use ulriksdal_xml::{NodeSet, XmlDocument};

use crate::pipeline::{TransformContext, TransformData};

/// The first `EncryptedData` inside an `r:encryptedGrant`.
fn next_encrypted_grant(document: &XmlDocument) -> Result<Option<roxmltree::NodeId>> {
    let doc = document.parse_doc()?;
    Ok(XmlDocument::find_elements(&doc, ns::REL, ns::node::ENCRYPTED_GRANT)
        .into_iter()
        .flat_map(|grant| grant.descendants())
        .find(|n| is_element_named(n, ns::ENC, ns::node::ENCRYPTED_DATA))
        .map(|n| n.id()))
}

pub(crate) fn apply(input: TransformData, ctx: &TransformContext<'_>) -> Result<TransformData> {
    let (mut document, mut nodes) = input.into_node_set()?;

    let mut decrypted = false;
    while let Some(id) = next_encrypted_grant(&document)? {
        let decryptor = ctx.decryptor.ok_or_else(|| {
            Error::XmlStructure("license carries an encryptedGrant but no decryptor is set".into())
        })?;
        let next = decryptor.decrypt_encrypted_data(&document, id)?;
        if next == document {
            return Err(Error::Decryption("encryptedGrant was not decrypted".into()));
        }
        document = next;
        decrypted = true;
    }

    let doc = document.parse_doc()?;
    if decrypted {
        // The old node ids do not survive the rewrite.
        nodes = NodeSet::all_without_comments(&doc);
    }
    for issuer in XmlDocument::find_elements(&doc, ns::REL, ns::node::ISSUER) {
        for sig in find_child_elements(issuer, ns::DSIG, ns::node::SIGNATURE) {
            nodes.remove_subtree(sig);
        }
    }
    drop(doc);
    Ok(TransformData::NodeSet { document, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt::tests::Plain;

    const LICENSE: &str = concat!(
        r#"<r:license xmlns:r="urn:mpeg:mpeg21:2003:01-REL-R-NS" xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#,
        r#"<r:grant>play</r:grant>"#,
        r#"<r:issuer><ds:Signature><ds:SignatureValue>s</ds:SignatureValue></ds:Signature></r:issuer>"#,
        r#"</r:license>"#
    );

    #[test]
    fn test_drops_issuer_signature() {
        let input = TransformData::Document(XmlDocument::parse(LICENSE).unwrap());
        let out = apply(input, &TransformContext::default()).unwrap();
        let text = String::from_utf8(out.into_stream().unwrap()).unwrap();
        assert!(text.contains("play"));
        assert!(text.contains("<r:issuer></r:issuer>"));
        assert!(!text.contains("SignatureValue"));
    }

    #[test]
    fn test_encrypted_grant() {
        let xml = concat!(
            r#"<r:license xmlns:r="urn:mpeg:mpeg21:2003:01-REL-R-NS"><r:encryptedGrant>"#,
            r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#"><xenc:CipherData>"#,
            r#"<xenc:CipherValue>&lt;r:grant&gt;view&lt;/r:grant&gt;</xenc:CipherValue>"#,
            r#"</xenc:CipherData></xenc:EncryptedData></r:encryptedGrant></r:license>"#
        );
        let input = || TransformData::Document(XmlDocument::parse(xml).unwrap());
        assert!(matches!(
            apply(input(), &TransformContext::default()),
            Err(Error::XmlStructure(_))
        ));

        let ctx = TransformContext {
            decryptor: Some(&Plain),
            ..Default::default()
        };
        let out = apply(input(), &ctx).unwrap();
        let text = String::from_utf8(out.into_stream().unwrap()).unwrap();
        assert!(text.contains("<r:grant>view</r:grant>"));
    }
}
