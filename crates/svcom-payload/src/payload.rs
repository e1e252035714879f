use std::fmt;

use bytes::Bytes;

use crate::error::{PayloadError, Result};

/// Partitioning of a payload buffer into lead, header, and data regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    /// Bytes reserved in front of the header (transport use).
    pub lead_offset: usize,
    /// Bytes of header following the lead region.
    pub header_size: usize,
}

impl Layout {
    /// Create a layout.
    pub const fn new(lead_offset: usize, header_size: usize) -> Self {
        Self {
            lead_offset,
            header_size,
        }
    }

    /// Check that this layout fits into a buffer of `len` bytes.
    pub fn validate(self, len: usize) -> Result<()> {
        match self.lead_offset.checked_add(self.header_size) {
            Some(prefix) if prefix <= len => Ok(()),
            _ => Err(PayloadError::LayoutOutOfBounds {
                lead_offset: self.lead_offset,
                header_size: self.header_size,
                len,
            }),
        }
    }

    /// Offset of the first data byte.
    pub const fn data_offset(self) -> usize {
        self.lead_offset + self.header_size
    }
}

/// An immutable, reference-counted payload.
///
/// Cloning shares the underlying buffer. Equality compares the header and
/// data regions byte-wise; the lead region is not part of the value.
#[derive(Clone)]
pub struct Payload {
    buf: Bytes,
    layout: Layout,
}

static EMPTY: Payload = Payload {
    buf: Bytes::new(),
    layout: Layout::new(0, 0),
};

impl Payload {
    /// Create a payload without header; the whole buffer is data.
    pub fn new(buffer: impl Into<Bytes>) -> Self {
        Self {
            buf: buffer.into(),
            layout: Layout::default(),
        }
    }

    /// Create a payload whose first `header_size` bytes are header.
    ///
    /// # Panics
    ///
    /// Panics if `header_size` exceeds the buffer length.
    pub fn with_header(header_size: usize, buffer: impl Into<Bytes>) -> Self {
        Self::with_lead(0, header_size, buffer)
    }

    /// Create a payload with a lead region, a header, and data.
    ///
    /// # Panics
    ///
    /// Panics if `lead_offset + header_size` exceeds the buffer length. A bad
    /// layout is a programming error; use [`Payload::try_with_lead`] for
    /// layouts that come from outside the process.
    pub fn with_lead(lead_offset: usize, header_size: usize, buffer: impl Into<Bytes>) -> Self {
        match Self::try_with_lead(lead_offset, header_size, buffer) {
            Ok(payload) => payload,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`Payload::with_lead`].
    pub fn try_with_lead(
        lead_offset: usize,
        header_size: usize,
        buffer: impl Into<Bytes>,
    ) -> Result<Self> {
        let buf = buffer.into();
        let layout = Layout::new(lead_offset, header_size);
        layout.validate(buf.len())?;
        Ok(Self { buf, layout })
    }

    pub(crate) fn from_parts(buf: Bytes, layout: Layout) -> Self {
        debug_assert!(layout.validate(buf.len()).is_ok());
        Self { buf, layout }
    }

    /// The shared empty payload: no header, no data.
    pub fn empty() -> &'static Payload {
        &EMPTY
    }

    /// Application-visible bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.layout.data_offset()..]
    }

    /// Header bytes.
    pub fn header(&self) -> &[u8] {
        let start = self.layout.lead_offset;
        &self.buf[start..start + self.layout.header_size]
    }

    /// Leading bytes in front of the header.
    pub fn lead(&self) -> &[u8] {
        &self.buf[..self.layout.lead_offset]
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn lead_offset(&self) -> usize {
        self.layout.lead_offset
    }

    pub fn header_size(&self) -> usize {
        self.layout.header_size
    }

    /// Length of the data region.
    pub fn len(&self) -> usize {
        self.buf.len() - self.layout.data_offset()
    }

    /// True when the data region is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data region as a shared [`Bytes`] handle, without copying.
    pub fn data_bytes(&self) -> Bytes {
        self.buf.slice(self.layout.data_offset()..)
    }

    /// The whole buffer, lead and header included.
    pub fn into_bytes(self) -> Bytes {
        self.buf
    }
}

impl Default for Payload {
    fn default() -> Self {
        EMPTY.clone()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.header() == other.header() && self.data() == other.data()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("lead_offset", &self.layout.lead_offset)
            .field("header", &self.header())
            .field("data_len", &self.len())
            .finish()
    }
}

impl From<Bytes> for Payload {
    fn from(buf: Bytes) -> Self {
        Self::new(buf)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(buf: Vec<u8>) -> Self {
        Self::new(buf)
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self::new(Bytes::from_static(text.as_bytes()))
    }
}
