//! Compression codecs for micro-channel pipelines
//!
//! This crate plugs streaming decompression into a [`micro_channel`] pipeline. The
//! decoders implement [`MessageDecoder`](micro_channel::codec::MessageDecoder), so they
//! run as a pipeline stage through [`DecoderHandler`](micro_channel::codec::DecoderHandler).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use micro_channel::codec::DecoderHandler;
//! use micro_channel::pipeline::Pipeline;
//! use micro_codec::{ZlibDecoder, ZlibWrapper};
//!
//! let decoder = Arc::new(ZlibDecoder::with_wrapper(ZlibWrapper::Gzip));
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_last("inflater", DecoderHandler::new(Arc::clone(&decoder))).unwrap();
//!
//! // the decoder stays reachable for liveness probes
//! assert!(!decoder.is_closed());
//! ```
//!
//! # Components
//!
//! - [`ZlibDecoder`]: inflates zlib, gzip or raw deflate streams chunk by chunk
//! - [`ZlibWrapper`]: the framing the decoder expects
//! - [`CompressionError`]: initialization and decompression failures

mod error;
mod wrapper;
mod zlib_decoder;

pub use error::CompressionError;
pub use error::EngineStatus;
pub use wrapper::ZlibWrapper;
pub use zlib_decoder::ZlibDecoder;
