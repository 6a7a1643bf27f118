#![forbid(unsafe_code)]

//! XSLT transform. Stylesheet execution is delegated to the caller.

use ulriksdal_core::{Error, Result};

use crate::pipeline::{TransformContext, TransformData};

/// Runs an XSLT stylesheet over serialized input.
pub trait XsltProcessor {
    fn transform(&self, stylesheet: &str, input: &[u8]) -> Result<Vec<u8>>;
}

pub(crate) fn apply(
    input: TransformData,
    stylesheet: &str,
    ctx: &TransformContext<'_>,
) -> Result<TransformData> {
    let processor = ctx
        .xslt
        .ok_or_else(|| Error::UnsupportedAlgorithm("XSLT transform without a processor".into()))?;
    let bytes = input.into_stream()?;
    Ok(TransformData::Stream(processor.transform(stylesheet, &bytes)?))
}
