//! Shared payload buffers for svcom.
//!
//! Every event value and method request/reply travels as a [`Payload`]:
//! a reference-counted byte region laid out as
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────┐
//! │ lead_offset  │ header_size  │ data                  │
//! │ (transport)  │ (framing)    │ (application bytes)   │
//! └──────────────┴──────────────┴──────────────────────┘
//! ```
//!
//! Payloads are cheap to clone and safe to hand to many subscribers on
//! many threads. Header bytes can only be written through [`PayloadMut`],
//! before the buffer is frozen and shared.

pub mod error;
pub mod payload;
pub mod writable;

pub use error::{PayloadError, Result};
pub use payload::{Layout, Payload};
pub use writable::PayloadMut;
