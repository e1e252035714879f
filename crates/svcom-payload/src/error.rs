/// Errors that can occur while validating a payload layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Lead offset plus header size do not fit into the buffer.
    #[error("payload layout out of bounds (lead {lead_offset} + header {header_size} > {len} bytes)")]
    LayoutOutOfBounds {
        lead_offset: usize,
        header_size: usize,
        len: usize,
    },
}

pub type Result<T> = std::result::Result<T, PayloadError>;
