//! Stream relay engine: backend bytes → [`framer`] → [`decoder`] → [`controller`] → [`sink`].

pub mod controller;
pub mod decoder;
pub mod framer;
pub mod sink;

pub use controller::RelayController;
pub use decoder::{decode, decode_body, DecodeError, Decoded};
pub use framer::{FramedRecord, LineFramer};
pub use sink::{EventSink, RelayEvent, SseSink, WriteError};
