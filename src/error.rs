//! Error types for the ruxtab library

/// Library error type covering every decoder in the crate.
#[derive(Debug, thiserror::Error)]
pub enum TabError {
    /// A read passed the end of the input buffer
    #[error("truncated input: {0}")]
    Truncated(String),

    /// Magic bytes did not match the claimed format
    #[error("bad header: {0}")]
    BadHeader(String),

    /// Detection found no match and no useful filename
    #[error("unrecognized format")]
    UnrecognizedFormat,

    /// A decoder was handed a file of another version
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    /// RFC 1951 violation in a deflate stream
    #[error("corrupt deflate stream: {0}")]
    CorruptDeflate(String),

    /// Archive entry uses a compression method other than stored or deflate
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Container is structurally valid but unusable (e.g. no score.gpif)
    #[error("bad container: {0}")]
    BadContainer(String),

    /// XML parse failure from the DOM collaborator
    #[error("bad xml: {0}")]
    BadXml(String),
}

impl From<roxmltree::Error> for TabError {
    fn from(error: roxmltree::Error) -> Self {
        Self::BadXml(error.to_string())
    }
}
