//! Scripted collaborator fakes for tests and examples.
//!
//! Each fake implements one collaborator contract with fully
//! deterministic behavior, so pipeline tests can run without devices,
//! codecs, or containers. They double as reference implementations of
//! the contracts.

use crate::error::{Error, Result};
use crate::format::TrackFormat;
use crate::frame::{Frame, FrameFlags};
use crate::stages::capture::{Capture, CaptureRead};
use crate::stages::encoder::{Polled, Transform};
use crate::stages::muxer::SampleSink;
use crate::supply::FrameProvider;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// ============================================================================
// ScriptedCapture
// ============================================================================

/// A capture source that serves a fixed number of synthetic frames with
/// deterministic timestamps, then reports "not ready" forever.
pub struct ScriptedCapture {
    frames_total: usize,
    frame_millis: u32,
    /// Report "not ready" on every Nth poll (0 = never).
    stutter: usize,
    served: usize,
    polls: usize,
}

impl ScriptedCapture {
    /// A source with `frames_total` frames of `frame_millis` each.
    pub fn new(frames_total: usize, frame_millis: u32) -> Self {
        Self {
            frames_total,
            frame_millis,
            stutter: 0,
            served: 0,
            polls: 0,
        }
    }

    /// Make every `every`-th poll report "not ready".
    pub fn with_stutter(mut self, every: usize) -> Self {
        self.stutter = every;
        self
    }

    /// Number of frames served so far.
    pub fn served(&self) -> usize {
        self.served
    }
}

impl Capture for ScriptedCapture {
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<Option<CaptureRead>> {
        self.polls += 1;
        if self.served >= self.frames_total {
            return Ok(None);
        }
        if self.stutter > 0 && self.polls % self.stutter == 0 {
            return Ok(None);
        }

        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = (self.served + i) as u8;
        }
        let pts_us = self.served as i64 * self.frame_millis as i64 * 1_000;
        self.served += 1;
        Ok(Some(CaptureRead {
            len: dst.len(),
            pts_us: Some(pts_us),
        }))
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// LoopbackTransform
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum SlotState {
    Free,
    Reserved,
    InFlight,
}

/// A pass-through "codec" with a fixed set of slots.
///
/// Queued input comes back out unchanged, tagged with the slot it was
/// queued on; end of stream propagates. The output format is announced
/// exactly once before the first frame (twice with
/// [`announce_format_twice`](Self::announce_format_twice), for testing
/// the double-resolution guard).
pub struct LoopbackTransform {
    format: TrackFormat,
    slots: Vec<SlotState>,
    ready: VecDeque<(usize, Vec<u8>, i64, FrameFlags)>,
    announcements_left: usize,
}

impl LoopbackTransform {
    /// A loopback device with `slots` input/output slots.
    pub fn new(format: TrackFormat, slots: usize) -> Self {
        Self {
            format,
            slots: vec![SlotState::Free; slots],
            ready: VecDeque::new(),
            announcements_left: 1,
        }
    }

    /// Misbehave: report the output format twice.
    pub fn announce_format_twice(mut self) -> Self {
        self.announcements_left = 2;
        self
    }

    /// Number of slots currently free.
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| **s == SlotState::Free).count()
    }
}

impl Transform for LoopbackTransform {
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>> {
        for (slot, state) in self.slots.iter_mut().enumerate() {
            if *state == SlotState::Free {
                *state = SlotState::Reserved;
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn queue_input(
        &mut self,
        slot: usize,
        data: &[u8],
        pts_us: i64,
        flags: FrameFlags,
    ) -> Result<()> {
        match self.slots.get(slot) {
            Some(SlotState::Reserved) => {}
            _ => {
                return Err(Error::Process(format!(
                    "input queued on slot {slot} that was not dequeued"
                )))
            }
        }
        self.ready.push_back((slot, data.to_vec(), pts_us, flags));
        Ok(())
    }

    fn poll_output(&mut self) -> Result<Polled> {
        if self.announcements_left > 0 {
            self.announcements_left -= 1;
            return Ok(Polled::FormatReady(self.format.clone()));
        }

        let Some((slot, data, pts_us, flags)) = self.ready.pop_front() else {
            return Ok(Polled::Pending);
        };
        self.slots[slot] = SlotState::InFlight;

        let mut frame = Frame::from_payload(&data, pts_us, slot);
        frame.flags = flags;
        if flags.is_eos() {
            frame.size = 0;
        }
        Ok(Polled::Frame(frame))
    }

    fn release_output(&mut self, slot: usize) -> Result<()> {
        match self.slots.get(slot) {
            Some(SlotState::InFlight) => {
                self.slots[slot] = SlotState::Free;
                Ok(())
            }
            _ => Err(Error::Consistency(format!(
                "released slot {slot} that was not in flight"
            ))),
        }
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// VecSink
// ============================================================================

/// One recorded sink write.
#[derive(Debug, Clone)]
pub struct SinkWrite {
    /// Track index the sample was written to.
    pub track: usize,
    /// Timestamp the sample was written with.
    pub pts_us: i64,
    /// Copied payload bytes.
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct VecSinkState {
    tracks: Vec<TrackFormat>,
    writes: Vec<SinkWrite>,
    begun: bool,
    finished: bool,
}

/// An in-memory container sink that records every write.
///
/// Clones share state, so a test can keep one clone while the muxer owns
/// the other.
#[derive(Clone, Default)]
pub struct VecSink {
    state: Arc<Mutex<VecSinkState>>,
}

impl VecSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write recorded so far.
    pub fn writes(&self) -> Vec<SinkWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Number of registered tracks.
    pub fn track_count(&self) -> usize {
        self.state.lock().unwrap().tracks.len()
    }

    /// True once `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }
}

impl SampleSink for VecSink {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.begun {
            return Err(Error::Setup("track added after container start".into()));
        }
        state.tracks.push(format.clone());
        Ok(state.tracks.len() - 1)
    }

    fn begin(&mut self) -> Result<()> {
        self.state.lock().unwrap().begun = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, frame: &Frame) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.begun || state.finished {
            return Err(Error::Process("sink is not accepting writes".into()));
        }
        if track >= state.tracks.len() {
            return Err(Error::Process(format!("unknown track {track}")));
        }
        state.writes.push(SinkWrite {
            track,
            pts_us: frame.pts_us,
            payload: frame.payload().to_vec(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.state.lock().unwrap().finished = true;
        Ok(())
    }
}

// ============================================================================
// QueueProvider
// ============================================================================

struct QueueProviderState {
    queue: VecDeque<Frame>,
    outstanding: usize,
    returned: Vec<Frame>,
}

/// A provider pre-loaded with a fixed frame sequence.
///
/// Useful for driving a consumer stage directly; it keeps the returned
/// frames and the outstanding count so tests can assert the exchange
/// contract was honored.
pub struct QueueProvider {
    state: Mutex<QueueProviderState>,
}

impl QueueProvider {
    /// A provider serving `frames` in order.
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            state: Mutex::new(QueueProviderState {
                queue: frames.into(),
                outstanding: 0,
                returned: Vec::new(),
            }),
        }
    }

    /// Number of frames returned so far.
    pub fn returned_len(&self) -> usize {
        self.state.lock().unwrap().returned.len()
    }

    /// Number of frames currently held by the consumer.
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().outstanding
    }

    /// Number of frames still waiting to be pulled.
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

impl FrameProvider for QueueProvider {
    fn pull_output(&self) -> Option<Frame> {
        let mut state = self.state.lock().unwrap();
        let frame = state.queue.pop_front();
        if frame.is_some() {
            state.outstanding += 1;
        }
        frame
    }

    fn return_output(&self, frame: Frame) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.outstanding == 0 {
            return Err(Error::Consistency(
                "frame returned to scripted provider that was never pulled".into(),
            ));
        }
        state.outstanding -= 1;
        state.returned.push(frame);
        Ok(())
    }
}
