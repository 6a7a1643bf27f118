#![forbid(unsafe_code)]

//! Base64 decode transform.
//!
//! A stream is decoded as-is. For XML input the text nodes of the set are
//! concatenated in document order first, so `<e>aGVs\nbG8=</e>` decodes
//! to `hello`. Whitespace is ignored in both cases.

use base64::Engine;
use ulriksdal_core::{Error, Result};

use crate::pipeline::TransformData;

pub(crate) fn decode(input: TransformData) -> Result<TransformData> {
    let text = match input {
        TransformData::Stream(bytes) => String::from_utf8(bytes)
            .map_err(|e| Error::Transform(format!("base64 input not UTF-8: {e}")))?,
        other => {
            let (document, nodes) = other.into_node_set()?;
            let doc = document.parse_doc()?;
            nodes
                .text_nodes(&doc)
                .into_iter()
                .filter_map(|n| n.text())
                .collect()
        }
    };
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| Error::Base64(format!("decode error: {e}")))?;
    Ok(TransformData::Stream(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulriksdal_xml::XmlDocument;

    #[test]
    fn test_decode_stream_with_whitespace() {
        let out = decode(TransformData::Stream(b"aGVs\r\n bG8=".to_vec())).unwrap();
        assert!(matches!(out, TransformData::Stream(ref b) if b == b"hello"));
    }

    #[test]
    fn test_decode_element_text() {
        let doc = XmlDocument::parse("<e>aGVs<!--skip-->bG8=</e>").unwrap();
        let out = decode(TransformData::Document(doc)).unwrap();
        assert!(matches!(out, TransformData::Stream(ref b) if b == b"hello"));
    }

    #[test]
    fn test_invalid_base64() {
        assert!(matches!(
            decode(TransformData::Stream(b"@@@".to_vec())),
            Err(Error::Base64(_))
        ));
    }
}
