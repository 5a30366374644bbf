//! Decoder, emitter and composer for the Standard Hydrometeorologic Exchange
//! Format (SHEF, NWS version 2.2): free-form `.A`/`.B`/`.E` message text in,
//! typed UTC observations out, and the reverse direction for exporters that
//! need to synthesize conforming SHEF text from stored time series.

pub mod composer;
pub mod decoder;
pub mod emitter;
pub mod error;
pub mod loader;
pub mod registry;
pub mod shef_time;
pub mod tokenizer;
pub mod value;

pub use decoder::{DecodeOptions, DecodeOutcome, Decoder};
pub use emitter::EmitFormat;
pub use error::{Diagnostic, ShefError};
pub use registry::ParamRegistry;
pub use shef_time::{TimeMode, ZoneCode};
pub use tokenizer::{MessageKind, MessageRecord, Tokenizer};
pub use value::{ShefValue, UnitSystem, MISSING_VALUE, TRACE_VALUE};
