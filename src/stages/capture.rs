//! Capture stage: polls a raw source into pooled frames.

use crate::error::Result;
use crate::frame::{Frame, FrameFlags};
use crate::stage::Stage;
use crate::supply::{FrameProvider, Supply};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bytes per PCM sample (16-bit).
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Parameters of a raw capture stream.
///
/// Values arrive already validated; this crate does no configuration
/// parsing of its own.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Duration of one captured frame in milliseconds.
    pub frame_millis: u32,
    /// Number of frames in the fixed pool.
    pub pool_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            frame_millis: 20,
            pool_frames: 3,
        }
    }
}

impl CaptureConfig {
    /// Raw data rate in bytes per second.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * BYTES_PER_SAMPLE as u64
    }

    /// Size of one pooled frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        (self.byte_rate() * self.frame_millis as u64 / 1_000) as usize
    }
}

/// One successful capture poll.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRead {
    /// Number of bytes written into the destination.
    pub len: usize,
    /// Timestamp of the first byte, if the source keeps its own clock.
    /// When absent, the stage derives one from the running byte count.
    pub pts_us: Option<i64>,
}

/// Contract of a raw audio/video source collaborator.
///
/// Polling is non-blocking: a source that has nothing buffered reports
/// `Ok(None)` and the stage retries on its next tick. End of stream is
/// not the source's concern; the stage flags it itself once a stop
/// request has arrived through the command relay.
pub trait Capture: Send {
    /// Start delivering data.
    fn begin(&mut self) -> Result<()>;

    /// Fill `dst` with captured bytes, or report not ready.
    fn read(&mut self, dst: &mut [u8]) -> Result<Option<CaptureRead>>;

    /// Stop delivering data and release the device.
    fn finish(&mut self) -> Result<()>;
}

/// Handle for requesting a capture stop from any thread.
///
/// The request travels through the stage's command relay and takes
/// effect inside the stage's own next processing tick.
#[derive(Clone)]
pub struct CaptureControl {
    supply: Arc<Supply>,
    stop_requested: Arc<AtomicBool>,
}

impl CaptureControl {
    /// Request that the stage stop producing after the current data.
    pub fn stop(&self) {
        tracing::info!("stop requested for capture '{}'", self.supply.name());
        let flag = Arc::clone(&self.stop_requested);
        self.supply
            .submit(Box::new(move |_| flag.store(true, Ordering::SeqCst)));
    }
}

/// A producing stage that fills pooled frames from a [`Capture`] source.
///
/// Owns a fixed pool (allocated at `setup`); recycled frames go straight
/// back to the free set. After a stop request the stage emits exactly one
/// zero-length end-of-stream frame and then produces nothing more. The
/// all-data-ready transition happens together with that emission, never
/// before it, so the stage cannot slip into `Done` with the marker still
/// unsent.
pub struct CaptureStage<C: Capture> {
    name: String,
    config: CaptureConfig,
    capture: C,
    supply: Arc<Supply>,
    stop_requested: Arc<AtomicBool>,
    bytes_read: u64,
    eos_sent: bool,
}

impl<C: Capture> CaptureStage<C> {
    /// Create a capture stage around a source collaborator.
    pub fn new(name: impl Into<String>, config: CaptureConfig, capture: C) -> Self {
        let name = name.into();
        Self {
            supply: Arc::new(Supply::new(name.clone())),
            name,
            config,
            capture,
            stop_requested: Arc::new(AtomicBool::new(false)),
            bytes_read: 0,
            eos_sent: false,
        }
    }

    /// The provider consumers pull finished frames from.
    pub fn provider(&self) -> Arc<dyn FrameProvider> {
        Arc::clone(&self.supply) as Arc<dyn FrameProvider>
    }

    /// A cloneable stop handle.
    pub fn control(&self) -> CaptureControl {
        CaptureControl {
            supply: Arc::clone(&self.supply),
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }

    /// The stage's frame accounting, exposed for inspection.
    pub fn supply(&self) -> &Arc<Supply> {
        &self.supply
    }

    /// Stream-relative timestamp of the next byte to be read.
    fn stream_pts_us(&self) -> i64 {
        (self.bytes_read * 1_000_000 / self.config.byte_rate().max(1)) as i64
    }
}

impl<C: Capture> Stage for CaptureStage<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<()> {
        self.capture.begin()?;

        let frame_bytes = self.config.frame_bytes();
        self.supply.install_pool(
            (0..self.config.pool_frames)
                .map(|slot| Frame::with_capacity(frame_bytes, slot))
                .collect(),
        )?;
        self.supply.mark_set_up();
        tracing::info!(
            "capture '{}' set up: {} frames of {} bytes",
            self.name,
            self.config.pool_frames,
            frame_bytes
        );
        Ok(())
    }

    fn process_frame(&mut self) -> Result<()> {
        self.supply.housekeep(|frames| {
            self.supply.restock(frames);
            Ok(())
        })?;

        if self.supply.is_done() {
            return Ok(());
        }

        if self.stop_requested.load(Ordering::SeqCst) {
            if !self.eos_sent {
                if let Some(mut frame) = self.supply.take_free() {
                    frame.flags = FrameFlags::eos();
                    frame.pts_us = self.stream_pts_us();
                    self.supply.enqueue_processed(frame);
                    self.eos_sent = true;
                    self.supply.mark_all_data_ready();
                    tracing::info!("capture '{}' queued end-of-stream marker", self.name);
                }
            }
            return Ok(());
        }

        let Some(mut frame) = self.supply.take_free() else {
            return Ok(());
        };

        match self.capture.read(frame.storage_mut()) {
            Ok(Some(read)) => {
                frame.offset = 0;
                frame.size = read.len.min(frame.capacity());
                frame.pts_us = read.pts_us.unwrap_or_else(|| self.stream_pts_us());
                self.bytes_read += frame.size as u64;
                self.supply.enqueue_processed(frame);
                Ok(())
            }
            Ok(None) => {
                // Not ready; retry next tick.
                self.supply.restock(vec![frame]);
                Ok(())
            }
            Err(e) => {
                self.supply.restock(vec![frame]);
                Err(e)
            }
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.finish() {
            tracing::error!("capture '{}' release failed: {}", self.name, e);
        }
    }

    fn is_done(&self) -> bool {
        self.supply.is_done()
    }
}
