//! Encoder stage: feeds an external transform device and drains its output.

use crate::error::Result;
use crate::format::TrackFormat;
use crate::frame::{Frame, FrameFlags};
use crate::future::OneShotCell;
use crate::stage::Stage;
use crate::supply::{FrameProvider, Supply};
use std::sync::Arc;

/// Result of one non-blocking output poll on a transform device.
#[derive(Debug)]
pub enum Polled {
    /// No output available yet.
    Pending,
    /// The device's output layout changed; re-poll to continue.
    LayoutChanged,
    /// The device settled on its output format. Reported exactly once,
    /// before the first output frame.
    FormatReady(TrackFormat),
    /// One output frame. Its `slot` identifies the device buffer and must
    /// come back through [`Transform::release_output`].
    Frame(Frame),
}

/// Contract of an encode/decode transform collaborator.
///
/// Shaped after asynchronous hardware codecs: input buffers are acquired
/// by slot, filled and queued; output is polled without blocking and
/// drained frame by frame; output slots are handed back once downstream
/// is finished with them.
pub trait Transform: Send {
    /// Start the device.
    fn begin(&mut self) -> Result<()>;

    /// Acquire a free input slot, if the device has one.
    fn dequeue_input(&mut self) -> Result<Option<usize>>;

    /// Queue payload bytes into a previously acquired input slot.
    fn queue_input(&mut self, slot: usize, data: &[u8], pts_us: i64, flags: FrameFlags)
        -> Result<()>;

    /// Poll for output. Never blocks.
    fn poll_output(&mut self) -> Result<Polled>;

    /// Hand an output slot back to the device for reuse.
    fn release_output(&mut self, slot: usize) -> Result<()>;

    /// Stop the device and release its resources.
    fn finish(&mut self) -> Result<()>;
}

/// A producing stage that pushes upstream frames through a [`Transform`]
/// and supplies the transformed output.
///
/// The stage's output frames live in slots owned by the device, so its
/// supply carries no pool of its own; recycled frames are translated into
/// [`Transform::release_output`] calls. The negotiated output format is
/// published through a [`OneShotCell`] for the downstream muxer.
pub struct EncoderStage<T: Transform> {
    name: String,
    codec: T,
    upstream: Arc<dyn FrameProvider>,
    supply: Arc<Supply>,
    format: Arc<OneShotCell<TrackFormat>>,
    /// Input slot acquired but not yet filled, kept across ticks while
    /// upstream has nothing for us.
    pending_input: Option<usize>,
}

impl<T: Transform> EncoderStage<T> {
    /// Create an encoder stage pulling raw frames from `upstream`.
    pub fn new(name: impl Into<String>, codec: T, upstream: Arc<dyn FrameProvider>) -> Self {
        let name = name.into();
        Self {
            supply: Arc::new(Supply::new(name.clone())),
            format: Arc::new(OneShotCell::new("encoder output format")),
            name,
            codec,
            upstream,
            pending_input: None,
        }
    }

    /// The provider consumers pull encoded frames from.
    pub fn provider(&self) -> Arc<dyn FrameProvider> {
        Arc::clone(&self.supply) as Arc<dyn FrameProvider>
    }

    /// The cell the negotiated output format will land in.
    pub fn output_format(&self) -> Arc<OneShotCell<TrackFormat>> {
        Arc::clone(&self.format)
    }

    /// The stage's frame accounting, exposed for inspection.
    pub fn supply(&self) -> &Arc<Supply> {
        &self.supply
    }

    /// Move at most one upstream frame into the device.
    fn feed_input(&mut self) -> Result<()> {
        if self.supply.is_all_data_ready() {
            return Ok(());
        }

        if self.pending_input.is_none() {
            self.pending_input = self.codec.dequeue_input()?;
        }
        let Some(slot) = self.pending_input else {
            return Ok(());
        };
        let Some(frame) = self.upstream.pull_output() else {
            return Ok(());
        };

        // End of stream travels as a zero-length submission.
        let data = if frame.flags.is_eos() {
            &[][..]
        } else {
            frame.payload()
        };

        match self.codec.queue_input(slot, data, frame.pts_us, frame.flags) {
            Ok(()) => {
                self.pending_input = None;
                self.upstream.return_output(frame)
            }
            Err(e) => {
                let _ = self.upstream.return_output(frame);
                Err(e)
            }
        }
    }

    /// Pull at most one output frame out of the device.
    fn drain_output(&mut self) -> Result<()> {
        if !self.supply.has_output_capacity() {
            // Consumer is behind; let the device hold its output.
            return Ok(());
        }

        match self.codec.poll_output()? {
            Polled::Pending => {}
            Polled::LayoutChanged => {
                tracing::debug!("encoder '{}' output layout changed", self.name);
            }
            Polled::FormatReady(format) => {
                tracing::info!("encoder '{}' output format ready: {:?}", self.name, format);
                self.format.set(format)?;
            }
            Polled::Frame(mut frame) => {
                if frame.flags.is_eos() {
                    frame.size = 0;
                    self.supply.mark_all_data_ready();
                    tracing::info!("encoder '{}' reached end of stream", self.name);
                }
                self.supply.enqueue_processed(frame);
            }
        }
        Ok(())
    }
}

impl<T: Transform> Stage for EncoderStage<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<()> {
        self.codec.begin()?;
        self.supply.mark_set_up();
        tracing::info!("encoder '{}' set up", self.name);
        Ok(())
    }

    fn process_frame(&mut self) -> Result<()> {
        let supply = Arc::clone(&self.supply);
        supply.housekeep(|frames| {
            for frame in frames {
                self.codec.release_output(frame.slot)?;
            }
            Ok(())
        })?;

        self.feed_input()?;
        self.drain_output()
    }

    fn release(&mut self) {
        if let Err(e) = self.codec.finish() {
            tracing::error!("encoder '{}' release failed: {}", self.name, e);
        }
    }

    fn is_done(&self) -> bool {
        self.supply.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::stages::testing::{LoopbackTransform, QueueProvider};

    fn upstream_with(frames: Vec<Frame>) -> Arc<QueueProvider> {
        Arc::new(QueueProvider::new(frames))
    }

    fn data_frame(payload: &[u8], pts_us: i64, slot: usize) -> Frame {
        Frame::from_payload(payload, pts_us, slot)
    }

    fn eos_frame(pts_us: i64, slot: usize) -> Frame {
        let mut frame = Frame::with_capacity(0, slot);
        frame.pts_us = pts_us;
        frame.flags = FrameFlags::eos();
        frame
    }

    #[test]
    fn test_format_is_published_before_first_frame() {
        let upstream = upstream_with(vec![data_frame(b"pcm", 0, 0)]);
        let codec = LoopbackTransform::new(TrackFormat::aac(44_100, 1, 96_000), 2);
        let mut stage = EncoderStage::new("enc", codec, upstream);
        let format = stage.output_format();
        stage.setup().unwrap();

        assert!(!format.is_set());
        stage.process_frame().unwrap(); // feeds + announces format
        assert!(format.is_set());
        assert_eq!(format.get().sample_rate, 44_100);
        assert_eq!(stage.supply().processed_len(), 0);

        stage.process_frame().unwrap(); // now the frame comes out
        assert_eq!(stage.supply().processed_len(), 1);
    }

    #[test]
    fn test_frames_pass_through_and_upstream_gets_them_back() {
        let upstream = upstream_with(vec![
            data_frame(b"aa", 100, 0),
            data_frame(b"bb", 200, 1),
        ]);
        let codec = LoopbackTransform::new(TrackFormat::aac(8_000, 1, 64_000), 2);
        let mut stage = EncoderStage::new("enc", codec, Arc::clone(&upstream) as _);
        stage.setup().unwrap();

        let provider = stage.provider();
        let mut seen = Vec::new();
        for _ in 0..8 {
            stage.process_frame().unwrap();
            if let Some(frame) = provider.pull_output() {
                seen.push((frame.payload().to_vec(), frame.pts_us));
                provider.return_output(frame).unwrap();
            }
        }

        assert_eq!(seen, vec![(b"aa".to_vec(), 100), (b"bb".to_vec(), 200)]);
        assert_eq!(upstream.returned_len(), 2);
        assert_eq!(upstream.outstanding(), 0);
    }

    #[test]
    fn test_eos_drains_to_done() {
        let upstream = upstream_with(vec![data_frame(b"xy", 0, 0), eos_frame(20_000, 1)]);
        let codec = LoopbackTransform::new(TrackFormat::aac(8_000, 1, 64_000), 2);
        let mut stage = EncoderStage::new("enc", codec, upstream);
        stage.setup().unwrap();

        let provider = stage.provider();
        let mut eos_seen = false;
        for _ in 0..12 {
            stage.process_frame().unwrap();
            while let Some(frame) = provider.pull_output() {
                if frame.flags.is_eos() {
                    assert_eq!(frame.size, 0);
                    eos_seen = true;
                }
                provider.return_output(frame).unwrap();
            }
            if stage.is_done() {
                break;
            }
        }
        assert!(eos_seen);
        assert!(stage.is_done());
    }

    #[test]
    fn test_backpressure_caps_processed_queue() {
        let frames = (0..10)
            .map(|i| data_frame(&[i as u8; 4], i as i64 * 1_000, i))
            .collect();
        let codec = LoopbackTransform::new(TrackFormat::aac(8_000, 1, 64_000), 10);
        let mut stage = EncoderStage::new("enc", codec, upstream_with(frames));
        stage.setup().unwrap();

        // Nobody pulls: the processed queue must stop at the cap even
        // though upstream and the device could deliver more.
        for _ in 0..20 {
            stage.process_frame().unwrap();
        }
        assert_eq!(stage.supply().processed_len(), 3);
    }

    #[test]
    fn test_second_format_report_is_fatal() {
        let upstream = upstream_with(vec![]);
        let codec =
            LoopbackTransform::new(TrackFormat::aac(8_000, 1, 64_000), 2).announce_format_twice();
        let mut stage = EncoderStage::new("enc", codec, upstream);
        stage.setup().unwrap();

        stage.process_frame().unwrap(); // first announcement
        let err = stage.process_frame().unwrap_err(); // second one
        assert!(matches!(err, Error::Consistency(_)));
    }
}
