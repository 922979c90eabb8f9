//! Proof clip recording.
//!
//! A `Recording` owns one open clip writer. The writer is finished exactly once:
//! by `release()` on the normal path, or by `Drop` if the recording is abandoned
//! (error unwinding, shutdown).

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::BehaviorKind;

/// Frame rate of every proof clip.
pub const CLIP_FPS: u32 = 30;

/// An open clip being written frame by frame.
pub trait ClipWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the clip. Called at most once.
    fn finish(&mut self) -> Result<()>;
}

/// Opens clip writers for the channels.
pub trait ClipFactory: Send {
    /// File extension of produced clips, without the dot.
    fn extension(&self) -> &'static str;

    fn open(&mut self, path: &Path, width: u32, height: u32, fps: u32)
        -> Result<Box<dyn ClipWriter>>;
}

// ----------------------------------------------------------------------------
// Recording guard
// ----------------------------------------------------------------------------

/// Result of releasing a recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub frames: u64,
}

pub struct Recording {
    kind: BehaviorKind,
    path: PathBuf,
    writer: Option<Box<dyn ClipWriter>>,
    frames_written: u64,
}

impl Recording {
    pub fn start(
        factory: &mut dyn ClipFactory,
        kind: BehaviorKind,
        path: PathBuf,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let writer = factory
            .open(&path, width, height, CLIP_FPS)
            .with_context(|| format!("failed to open {} clip {}", kind, path.display()))?;
        Ok(Self {
            kind,
            path,
            writer: Some(writer),
            frames_written: 0,
        })
    }

    pub fn kind(&self) -> BehaviorKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("{} recording already released", self.kind))?;
        writer.write_frame(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Finish the clip and hand back its location.
    pub fn release(mut self) -> Result<RecordedClip> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .finish()
                .with_context(|| format!("failed to finish clip {}", self.path.display()))?;
        }
        Ok(RecordedClip {
            path: std::mem::take(&mut self.path),
            frames: self.frames_written,
        })
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                log::warn!("{} clip {} not finalized: {:#}", self.kind, self.path.display(), e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// YUV4MPEG2 clips
// ----------------------------------------------------------------------------

/// Writes uncompressed YUV4MPEG2 (4:4:4, full range) clips.
///
/// Needs no native codec libraries; any FFmpeg build can transcode the result.
#[derive(Debug, Default)]
pub struct Y4mClipFactory;

impl ClipFactory for Y4mClipFactory {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn open(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn ClipWriter>> {
        Ok(Box::new(Y4mClipWriter::create(path, width, height, fps)?))
    }
}

pub struct Y4mClipWriter {
    out: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    planes: Vec<u8>,
}

impl Y4mClipWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(anyhow!("clip size and fps must be non-zero"));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create clip {}", path.display()))?;
        let mut out = BufWriter::new(file);
        write!(
            out,
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C444 XCOLORRANGE=FULL\n",
            width, height, fps
        )?;
        Ok(Self {
            out: Some(out),
            width,
            height,
            planes: Vec::new(),
        })
    }
}

impl ClipWriter for Y4mClipWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame {}x{} does not match clip {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("clip already finished"))?;

        let plane = self.width as usize * self.height as usize;
        self.planes.clear();
        self.planes.resize(plane * 3, 0);
        for (i, rgb) in frame.pixels().chunks_exact(3).enumerate() {
            let (y, u, v) = rgb_to_yuv(rgb[0], rgb[1], rgb[2]);
            self.planes[i] = y;
            self.planes[plane + i] = u;
            self.planes[2 * plane + i] = v;
        }
        out.write_all(b"FRAME\n")?;
        out.write_all(&self.planes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}

/// BT.601 full-range conversion.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    (clamp(y), clamp(u), clamp(v))
}
