#![forbid(unsafe_code)]

//! XML decryption transform.
//!
//! Every `xenc:EncryptedData` in the document is replaced by its plaintext,
//! except those whose `Id`/`id`/`ID` is named by a `dcrpt:Except` URI.
//! Work proceeds breadth first: each pass decrypts the outermost
//! `EncryptedData` elements, and the plaintext they expose is picked up by
//! the next pass.

use tracing::debug;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_xml::document::DEFAULT_ID_ATTRS;
use ulriksdal_xml::XmlDocument;

use crate::pipeline::{TransformContext, TransformData};

/// Replaces one `EncryptedData` element with its decrypted content.
///
/// Implemented by the encryption engine; the transform layer only drives it.
pub trait DocumentDecryptor {
    /// Decrypt the `EncryptedData` element `encrypted_data` of `document`
    /// and return the document with that element replaced.
    fn decrypt_encrypted_data(
        &self,
        document: &XmlDocument,
        encrypted_data: roxmltree::NodeId,
    ) -> Result<XmlDocument>;
}

fn is_excepted(node: &roxmltree::Node<'_, '_>, except: &[String]) -> bool {
    DEFAULT_ID_ATTRS.iter().any(|attr| {
        node.attribute(*attr).is_some_and(|id| {
            except
                .iter()
                .any(|uri| uri.strip_prefix('#') == Some(id))
        })
    })
}

fn is_candidate(node: &roxmltree::Node<'_, '_>, except: &[String]) -> bool {
    ulriksdal_xml::document::is_element_named(node, ns::ENC, ns::node::ENCRYPTED_DATA)
        && !is_excepted(node, except)
}

/// The outermost decryptable `EncryptedData` elements, in reverse document
/// order.
///
/// Replacing an element only rewrites text from its start onwards, so node
/// ids of everything before it survive the re-parse. Working from the last
/// element back keeps the remaining ids of the pass valid.
fn outermost_encrypted_data(document: &XmlDocument, except: &[String]) -> Result<Vec<roxmltree::NodeId>> {
    let doc = document.parse_doc()?;
    let mut level: Vec<roxmltree::NodeId> = doc
        .descendants()
        .filter(|n| is_candidate(n, except))
        .filter(|n| !n.ancestors().skip(1).any(|a| is_candidate(&a, except)))
        .map(|n| n.id())
        .collect();
    level.reverse();
    Ok(level)
}

/// Decrypt every non-excepted `EncryptedData` of `document`.
pub fn decrypt_document_with(
    decryptor: &dyn DocumentDecryptor,
    mut document: XmlDocument,
    except: &[String],
) -> Result<XmlDocument> {
    let mut pass = 0usize;
    loop {
        let level = outermost_encrypted_data(&document, except)?;
        if level.is_empty() {
            return Ok(document);
        }
        pass += 1;
        debug!(pass, count = level.len(), "decryption transform: decrypting EncryptedData");
        for id in level {
            let next = decryptor.decrypt_encrypted_data(&document, id)?;
            if next == document {
                return Err(Error::Decryption(
                    "decryptor left the EncryptedData element in place".into(),
                ));
            }
            document = next;
        }
    }
}

pub(crate) fn decrypt(
    input: TransformData,
    except: &[String],
    ctx: &TransformContext<'_>,
) -> Result<TransformData> {
    let decryptor = ctx.decryptor.ok_or_else(|| {
        Error::XmlStructure("XML decryption transform needs a decryptor".into())
    })?;
    let document = input.into_document()?;
    Ok(TransformData::Document(decrypt_document_with(
        decryptor, document, except,
    )?))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Treats the `CipherValue` text of an `EncryptedData` as plaintext XML.
    pub(crate) struct Plain;

    impl DocumentDecryptor for Plain {
        fn decrypt_encrypted_data(
            &self,
            document: &XmlDocument,
            encrypted_data: roxmltree::NodeId,
        ) -> Result<XmlDocument> {
            let doc = document.parse_doc()?;
            let node = doc
                .get_node(encrypted_data)
                .ok_or_else(|| Error::XmlStructure("node vanished".into()))?;
            let value = node
                .descendants()
                .find(|n| ulriksdal_xml::document::is_element_named(n, ns::ENC, ns::node::CIPHER_VALUE))
                .map(ulriksdal_xml::document::element_text)
                .unwrap_or_default();
            document.splice(node.range(), &value)
        }
    }

    const ENC: &str = "http://www.w3.org/2001/04/xmlenc#";

    fn encrypted(id: &str, plaintext: &str) -> String {
        format!(
            r#"<xenc:EncryptedData xmlns:xenc="{ENC}" Id="{id}"><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>"#,
            ulriksdal_xml::writer::escape_text(plaintext)
        )
    }

    #[test]
    fn test_decrypts_nested_and_honours_except() {
        let inner = encrypted("inner", "<b>2</b>");
        let xml = format!("<r>{}{}</r>", encrypted("outer", &inner), encrypted("kept", "<c/>"));
        let ctx = TransformContext {
            decryptor: Some(&Plain),
            ..Default::default()
        };
        let out = decrypt(
            TransformData::Document(XmlDocument::parse(xml).unwrap()),
            &["#kept".to_owned()],
            &ctx,
        )
        .unwrap()
        .into_document()
        .unwrap();
        let doc = out.parse_doc().unwrap();
        assert!(doc.descendants().any(|n| n.has_tag_name("b")));
        let left = XmlDocument::find_elements(&doc, ns::ENC, ns::node::ENCRYPTED_DATA);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].attribute("Id"), Some("kept"));
    }

    #[test]
    fn test_siblings_decrypted_in_one_pass() {
        let xml = format!(
            "<r>{}<m/>{}{}</r>",
            encrypted("a", "<x>1</x>"),
            encrypted("b", &encrypted("b2", "<y>2</y>")),
            encrypted("c", "<z>3</z>")
        );
        let document = XmlDocument::parse(xml).unwrap();
        assert_eq!(outermost_encrypted_data(&document, &[]).unwrap().len(), 3);

        let out = decrypt_document_with(&Plain, document, &[]).unwrap();
        assert_eq!(out.text(), "<r><x>1</x><m/><y>2</y><z>3</z></r>");
    }

    #[test]
    fn test_decryptor_that_changes_nothing_is_an_error() {
        struct Stuck;
        impl DocumentDecryptor for Stuck {
            fn decrypt_encrypted_data(&self, document: &XmlDocument, _: roxmltree::NodeId) -> Result<XmlDocument> {
                Ok(document.clone())
            }
        }
        let document = XmlDocument::parse(format!("<r>{}</r>", encrypted("a", "<x/>"))).unwrap();
        assert!(matches!(
            decrypt_document_with(&Stuck, document, &[]),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_requires_decryptor() {
        let input = TransformData::Stream(b"<r/>".to_vec());
        assert!(matches!(
            decrypt(input, &[], &TransformContext::default()),
            Err(Error::XmlStructure(_))
        ));
    }
}
