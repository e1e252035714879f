use std::sync::Arc;

use svcom_payload::{Payload, PayloadMut};
use svcom_runtime::Runtime;

use crate::error::{PluginError, Result};

/// Converts payloads between their in-process and on-the-wire form.
pub trait PayloadTransform: Send {
    fn to_wire(&self, payload: &Payload) -> Result<Payload>;

    fn from_wire(&self, payload: &Payload) -> Result<Payload>;
}

pub type PayloadTransformFactory =
    Arc<dyn Fn(&Runtime) -> Result<Box<dyn PayloadTransform>> + Send + Sync>;

const LENGTH_HEADER: usize = 4;

/// Frames data with a 4-byte little-endian length in the payload header.
///
/// `from_wire` checks the recorded length against the data and strips the
/// header again.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefix;

impl LengthPrefix {
    pub fn factory() -> PayloadTransformFactory {
        fn create(_: &Runtime) -> Result<Box<dyn PayloadTransform>> {
            Ok(Box::new(LengthPrefix))
        }
        Arc::new(create)
    }
}

impl PayloadTransform for LengthPrefix {
    fn to_wire(&self, payload: &Payload) -> Result<Payload> {
        let data = payload.data();
        let len = u32::try_from(data.len()).map_err(|_| {
            PluginError::Transform(format!("payload too large: {} bytes", data.len()))
        })?;
        let mut wire = PayloadMut::zeroed(0, LENGTH_HEADER, 0);
        wire.header_mut().copy_from_slice(&len.to_le_bytes());
        wire.extend_from_slice(data);
        Ok(wire.freeze())
    }

    fn from_wire(&self, payload: &Payload) -> Result<Payload> {
        let header: [u8; LENGTH_HEADER] = payload.header().try_into().map_err(|_| {
            PluginError::Transform(format!(
                "expected a {LENGTH_HEADER}-byte header, found {}",
                payload.header().len()
            ))
        })?;
        let expected = u32::from_le_bytes(header) as usize;
        if expected != payload.data().len() {
            return Err(PluginError::Transform(format!(
                "length header says {expected} bytes, data has {}",
                payload.data().len()
            )));
        }
        Ok(Payload::new(payload.data_bytes()))
    }
}
