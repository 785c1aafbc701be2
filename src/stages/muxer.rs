//! Muxer stage: merges per-track frame streams into one container sink.

use crate::error::{Error, Result};
use crate::format::TrackFormat;
use crate::frame::Frame;
use crate::future::OneShotCell;
use crate::stage::{Stage, StageState};
use crate::supply::FrameProvider;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

/// Forward bump applied when a track delivers two frames with the same
/// timestamp. One millisecond, a heuristic tolerated by common container
/// writers; tune here if a sink objects.
pub const DUPLICATE_PTS_BUMP_US: i64 = 1_000;

/// Default bound on the wait for a track's negotiated format.
pub const DEFAULT_FORMAT_WAIT: Duration = Duration::from_secs(5);

/// Contract of a container-writer collaborator.
///
/// Tracks are registered up front, then samples are written one at a
/// time. All calls happen on the muxer's own thread; implementations need
/// not be thread-safe for concurrent callers.
pub trait SampleSink: Send {
    /// Register a track, returning its index in the container.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    /// Start the container. Called once, after every track is registered.
    fn begin(&mut self) -> Result<()>;

    /// Write one sample for a registered track.
    fn write_sample(&mut self, track: usize, frame: &Frame) -> Result<()>;

    /// Finalize the container.
    fn finish(&mut self) -> Result<()>;
}

/// Per-track writer state: `active` until the track's end-of-stream
/// marker arrives, then terminally `ended`.
struct TrackWriter {
    format: Arc<OneShotCell<TrackFormat>>,
    provider: Arc<dyn FrameProvider>,
    track_index: usize,
    last_pts_us: i64,
    ended: bool,
}

impl TrackWriter {
    fn new(format: Arc<OneShotCell<TrackFormat>>, provider: Arc<dyn FrameProvider>) -> Self {
        Self {
            format,
            provider,
            track_index: 0,
            last_pts_us: 0,
            ended: false,
        }
    }

    /// One tick: pull at most one frame and dispose of it.
    ///
    /// The frame always goes back to its provider, written or not; a sink
    /// write failure still returns the frame before propagating.
    fn write_pass(&mut self, sink: &mut dyn SampleSink) -> Result<()> {
        let Some(mut frame) = self.provider.pull_output() else {
            return Ok(());
        };

        if frame.flags.is_eos() {
            tracing::info!("track {} reached end of stream", self.track_index);
            self.ended = true;
            return self.provider.return_output(frame);
        }

        if frame.flags.is_config() {
            // Configuration already traveled through format negotiation.
            tracing::debug!("track {} ignoring config frame", self.track_index);
            return self.provider.return_output(frame);
        }

        if frame.pts_us < self.last_pts_us {
            tracing::warn!(
                "track {} out-of-order frame dropped: {} < {}",
                self.track_index,
                frame.pts_us,
                self.last_pts_us
            );
            return self.provider.return_output(frame);
        }
        if frame.pts_us == self.last_pts_us {
            frame.pts_us += DUPLICATE_PTS_BUMP_US;
        }

        let written = sink.write_sample(self.track_index, &frame);
        if written.is_ok() {
            self.last_pts_us = frame.pts_us;
            tracing::trace!(
                "track {} wrote {} bytes at {}",
                self.track_index,
                frame.size,
                frame.pts_us
            );
        }
        let returned = self.provider.return_output(frame);
        written.and(returned)
    }
}

/// N-to-1 stage that pulls from every track's provider, enforces each
/// track's monotonic-timestamp rule, and forwards samples to the sink.
///
/// There is no cross-track ordering guarantee; each track only promises
/// that what it writes never goes backwards. The muxer is done exactly
/// when every track has seen its end-of-stream marker.
pub struct Muxer {
    name: String,
    sink: Box<dyn SampleSink>,
    writers: SmallVec<[TrackWriter; 2]>,
    state: StageState,
    format_wait: Duration,
}

impl Muxer {
    /// Create a muxer writing into `sink`.
    pub fn new(name: impl Into<String>, sink: Box<dyn SampleSink>) -> Self {
        Self {
            name: name.into(),
            sink,
            writers: SmallVec::new(),
            state: StageState::Init,
            format_wait: DEFAULT_FORMAT_WAIT,
        }
    }

    /// Bound the per-track wait for a negotiated format during `setup`.
    pub fn with_format_wait(mut self, wait: Duration) -> Self {
        self.format_wait = wait;
        self
    }

    /// Attach a track: its format cell and the provider of its frames.
    ///
    /// Tracks can only be attached before `setup`.
    pub fn add_track(
        &mut self,
        format: Arc<OneShotCell<TrackFormat>>,
        provider: Arc<dyn FrameProvider>,
    ) -> Result<()> {
        if self.state != StageState::Init {
            return Err(Error::Consistency(format!(
                "muxer '{}' can only add tracks before setup",
                self.name
            )));
        }
        self.writers.push(TrackWriter::new(format, provider));
        Ok(())
    }

    /// Number of attached tracks.
    pub fn track_count(&self) -> usize {
        self.writers.len()
    }
}

impl Stage for Muxer {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<()> {
        for writer in &mut self.writers {
            // The one legitimate blocking wait in the pipeline: encoders
            // publish their format early in their stream, and container
            // sinks need every track registered before the first sample.
            let format = writer.format.get_timeout(self.format_wait)?;
            writer.track_index = self.sink.add_track(&format)?;
            tracing::info!(
                "muxer '{}' track[{}]: {:?}",
                self.name,
                writer.track_index,
                format
            );
        }
        self.sink.begin()?;
        self.state.advance(StageState::SetUp);
        tracing::info!("muxer '{}' configured", self.name);
        Ok(())
    }

    fn process_frame(&mut self) -> Result<()> {
        let mut all_ended = true;
        for writer in &mut self.writers {
            if !writer.ended {
                all_ended = false;
                writer.write_pass(self.sink.as_mut())?;
            }
        }

        if all_ended && self.state.advance(StageState::Done) {
            tracing::info!("muxer '{}' is done", self.name);
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.sink.finish() {
            tracing::error!("muxer '{}' release failed: {}", self.name, e);
        }
    }

    fn is_done(&self) -> bool {
        self.state == StageState::Done
    }
}
