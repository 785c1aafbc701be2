//! Concrete pipeline stages.
//!
//! Each stage wraps one external collaborator behind its contract trait:
//! [`capture`] polls a raw source, [`encoder`] feeds a transform device,
//! [`muxer`] interleaves encoded tracks into a sink, and [`wav`] dumps a
//! raw PCM track straight to a writer. [`testing`] ships scripted
//! collaborator fakes for tests.

pub mod capture;
pub mod encoder;
pub mod muxer;
pub mod testing;
pub mod wav;

pub use capture::{Capture, CaptureConfig, CaptureControl, CaptureRead, CaptureStage};
pub use encoder::{EncoderStage, Polled, Transform};
pub use muxer::{Muxer, SampleSink};
pub use wav::WavWriter;
