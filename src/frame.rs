//! Timestamped frame payloads exchanged between stages.

use bytes::BytesMut;

/// Flags indicating frame properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// Frame marks end of stream; carries no payload.
    pub eos: bool,
    /// Frame carries codec configuration data, not media samples.
    pub config: bool,
}

impl FrameFlags {
    /// Flags for an end-of-stream marker frame.
    pub const fn eos() -> Self {
        Self {
            eos: true,
            config: false,
        }
    }

    /// Flags for a codec-configuration frame.
    pub const fn config() -> Self {
        Self {
            eos: false,
            config: true,
        }
    }

    /// Check if the end-of-stream flag is set.
    pub const fn is_eos(&self) -> bool {
        self.eos
    }

    /// Check if the configuration flag is set.
    pub const fn is_config(&self) -> bool {
        self.config
    }
}

/// A timestamped, flagged chunk of media payload.
///
/// Frames are the unit of exchange between stages. Each frame belongs to a
/// fixed pool owned by the stage that produced it; `slot` is the frame's
/// identity within that pool and is what recycling is keyed on, never the
/// payload contents.
///
/// Frames move by value and are never cloned, so at any instant a frame
/// lives in exactly one of its supply's sets (or with the consumer that
/// pulled it).
#[derive(Debug)]
pub struct Frame {
    /// Payload storage. Capacity is the pool's slot size and never changes.
    data: BytesMut,
    /// Number of valid payload bytes, starting at `offset`.
    pub size: usize,
    /// Offset of the first valid payload byte.
    pub offset: usize,
    /// Presentation timestamp in microseconds. Monotonicity is intended
    /// but not guaranteed by sources.
    pub pts_us: i64,
    /// Frame property flags.
    pub flags: FrameFlags,
    /// Pool-slot identity, assigned once when the pool is built.
    pub slot: usize,
}

impl Frame {
    /// Create an empty frame with a zeroed payload of `capacity` bytes.
    pub fn with_capacity(capacity: usize, slot: usize) -> Self {
        Self {
            data: BytesMut::zeroed(capacity),
            size: 0,
            offset: 0,
            pts_us: 0,
            flags: FrameFlags::default(),
            slot,
        }
    }

    /// Create a frame holding a copy of `payload`.
    pub fn from_payload(payload: &[u8], pts_us: i64, slot: usize) -> Self {
        let mut data = BytesMut::zeroed(payload.len());
        data.copy_from_slice(payload);
        Self {
            data,
            size: payload.len(),
            offset: 0,
            pts_us,
            flags: FrameFlags::default(),
            slot,
        }
    }

    /// The valid payload window (`offset..offset + size`).
    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }

    /// The whole payload storage, for filling.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Slot capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Reset the frame to an empty, unflagged state, keeping its slot
    /// identity and storage.
    pub fn reset(&mut self) {
        self.size = 0;
        self.offset = 0;
        self.pts_us = 0;
        self.flags = FrameFlags::default();
    }
}
