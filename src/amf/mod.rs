//! AMF (Action Message Format) support
//!
//! RTMP command and data messages carry AMF0-encoded values. A publisher
//! only needs AMF0 on the wire: it announces `objectEncoding = 0` in
//! `connect`, and AMF3 command messages from the server are AMF0 bodies
//! behind a single format byte.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
