//! WAV writer stage: dumps a raw PCM track straight to a writer.
//!
//! A plain consumer stage (it supplies nothing downstream), useful for
//! capturing the uncompressed side of a pipeline next to the muxed
//! output. The RIFF size fields are written as placeholders at setup and
//! patched once end of stream arrives.

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::stage::{Stage, StageState};
use crate::supply::FrameProvider;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

const HEADER_LEN: u32 = 44;
const BITS_PER_SAMPLE: u16 = 16;

/// A stage that writes pulled PCM frames into a WAV container.
pub struct WavWriter<W: Write + Seek + Send> {
    name: String,
    out: W,
    sample_rate: u32,
    channels: u16,
    provider: Arc<dyn FrameProvider>,
    state: StageState,
    data_bytes: u32,
}

impl<W: Write + Seek + Send> WavWriter<W> {
    /// Create a WAV writer consuming PCM frames from `provider`.
    pub fn new(
        name: impl Into<String>,
        out: W,
        sample_rate: u32,
        channels: u16,
        provider: Arc<dyn FrameProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            out,
            sample_rate,
            channels,
            provider,
            state: StageState::Init,
            data_bytes: 0,
        }
    }

    /// Give back the underlying writer (for inspection in tests).
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self) -> std::io::Result<()> {
        let block_align = self.channels * (BITS_PER_SAMPLE / 8);
        let byte_rate = self.sample_rate * block_align as u32;

        self.out.write_all(b"RIFF")?;
        self.out.write_all(&0u32.to_le_bytes())?; // riff size, patched later
        self.out.write_all(b"WAVE")?;
        self.out.write_all(b"fmt ")?;
        self.out.write_all(&16u32.to_le_bytes())?;
        self.out.write_all(&1u16.to_le_bytes())?; // PCM
        self.out.write_all(&self.channels.to_le_bytes())?;
        self.out.write_all(&self.sample_rate.to_le_bytes())?;
        self.out.write_all(&byte_rate.to_le_bytes())?;
        self.out.write_all(&block_align.to_le_bytes())?;
        self.out.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;
        self.out.write_all(b"data")?;
        self.out.write_all(&0u32.to_le_bytes())?; // data size, patched later
        Ok(())
    }

    fn patch_sizes(&mut self) -> std::io::Result<()> {
        let riff_size = HEADER_LEN - 8 + self.data_bytes;
        self.out.seek(SeekFrom::Start(4))?;
        self.out.write_all(&riff_size.to_le_bytes())?;
        self.out.seek(SeekFrom::Start(40))?;
        self.out.write_all(&self.data_bytes.to_le_bytes())?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()
    }
}

impl<W: Write + Seek + Send> Stage for WavWriter<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> Result<()> {
        self.write_header()
            .map_err(|e| Error::Setup(format!("writing wav header: {e}")))?;
        self.state.advance(StageState::SetUp);
        Ok(())
    }

    fn process_frame(&mut self) -> Result<()> {
        let Some(frame) = self.provider.pull_output() else {
            return Ok(());
        };

        if frame.flags.is_eos() {
            self.provider.return_output(frame)?;
            self.patch_sizes()?;
            self.state.advance(StageState::Done);
            tracing::info!("wav '{}' finalized, {} data bytes", self.name, self.data_bytes);
            return Ok(());
        }

        if frame.flags.is_config() {
            return self.provider.return_output(frame);
        }

        let size = frame.size as u32;
        let written = self.out.write_all(frame.payload());
        let returned = self.provider.return_output(frame);
        written.map_err(Error::from).and(returned)?;
        self.data_bytes += size;
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::error!("wav '{}' release failed: {}", self.name, e);
        }
    }

    fn is_done(&self) -> bool {
        self.state == StageState::Done
    }
}
