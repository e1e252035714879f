use bytes::BytesMut;

use crate::error::Result;
use crate::payload::{Layout, Payload};

/// A payload that is still being filled in by its producer.
///
/// Header and data are writable until [`PayloadMut::freeze`] turns the buffer
/// into a shared, immutable [`Payload`].
#[derive(Debug)]
pub struct PayloadMut {
    buf: BytesMut,
    layout: Layout,
}

impl PayloadMut {
    /// Allocate a zero-filled payload with the given region sizes.
    pub fn zeroed(lead_offset: usize, header_size: usize, data_len: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(lead_offset + header_size + data_len),
            layout: Layout::new(lead_offset, header_size),
        }
    }

    /// Wrap an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if `lead_offset + header_size` exceeds the buffer length.
    pub fn with_lead(lead_offset: usize, header_size: usize, buffer: BytesMut) -> Self {
        match Self::try_with_lead(lead_offset, header_size, buffer) {
            Ok(payload) => payload,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_with_lead(lead_offset: usize, header_size: usize, buffer: BytesMut) -> Result<Self> {
        let layout = Layout::new(lead_offset, header_size);
        layout.validate(buffer.len())?;
        Ok(Self {
            buf: buffer,
            layout,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn header(&self) -> &[u8] {
        let start = self.layout.lead_offset;
        &self.buf[start..start + self.layout.header_size]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        let start = self.layout.lead_offset;
        &mut self.buf[start..start + self.layout.header_size]
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.layout.data_offset()..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.layout.data_offset();
        &mut self.buf[start..]
    }

    /// Append bytes to the data region.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Finish writing and share the buffer read-only.
    pub fn freeze(self) -> Payload {
        Payload::from_parts(self.buf.freeze(), self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_writable_until_frozen() {
        let mut payload = PayloadMut::zeroed(2, 2, 3);
        payload.header_mut().copy_from_slice(&[0xAB, 0xCD]);
        payload.data_mut().copy_from_slice(b"abc");
        payload.extend_from_slice(b"de");

        let frozen = payload.freeze();
        assert_eq!(frozen.lead(), &[0, 0]);
        assert_eq!(frozen.header(), &[0xAB, 0xCD]);
        assert_eq!(frozen.data(), b"abcde");
    }

    #[test]
    fn wrapping_a_short_buffer_fails() {
        let buf = BytesMut::from(&b"xy"[..]);
        assert!(PayloadMut::try_with_lead(1, 2, buf).is_err());
    }

    #[test]
    #[should_panic(expected = "layout out of bounds")]
    fn wrapping_a_short_buffer_panics() {
        let _ = PayloadMut::with_lead(0, 3, BytesMut::from(&b"xy"[..]));
    }
}
