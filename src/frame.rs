use std::alloc::{Layout, alloc, dealloc};
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::format::PixelFormat;
use crate::packet::Ticket;

pub type VideoEventSender = tokio::sync::broadcast::Sender<VideoEvent>;
pub type VideoEventReceiver = tokio::sync::broadcast::Receiver<VideoEvent>;

/// The unit emitted by the decode worker and consumed downstream.
#[derive(Clone)]
pub enum VideoEvent {
    Frame(VideoFrame, Ticket),
    Loop(Ticket),
    Eof,
}

// Allocation constants for duplicated plane buffers: 16 bytes of slack
// past the requested length at 32-byte alignment.
const PLANE_PAD: usize = 16;
const PLANE_ALIGN: usize = 32;

#[cfg(test)]
thread_local! {
    /// Net live `AlignedBuf` allocations on this thread, for leak checks.
    pub(crate) static LIVE_PLANE_ALLOCS: std::cell::Cell<isize> =
        const { std::cell::Cell::new(0) };
}

/// An owned, alignment-padded plane buffer. Freed exactly once, on drop.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// The buffer is uniquely owned heap memory; the raw pointer never aliases.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocates `len` usable bytes plus padding.
    pub fn new(len: usize) -> anyhow::Result<Self> {
        let layout = Layout::from_size_align(len + PLANE_PAD, PLANE_ALIGN)
            .map_err(|e| anyhow::anyhow!("plane layout for {} bytes: {}", len, e))?;
        let ptr = unsafe { alloc(layout) };
        let ptr =
            NonNull::new(ptr).ok_or_else(|| anyhow::anyhow!("plane allocation of {} bytes", len))?;
        #[cfg(test)]
        LIVE_PLANE_ALLOCS.with(|c| c.set(c.get() + 1));
        Ok(Self { ptr, len, layout })
    }

    pub fn copy_from(src: &[u8]) -> anyhow::Result<Self> {
        let buf = Self::new(src.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), buf.ptr.as_ptr(), src.len());
        }
        Ok(buf)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        #[cfg(test)]
        LIVE_PLANE_ALLOCS.with(|c| c.set(c.get() - 1));
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// One plane of a decoder-owned picture: `linesize * plane_height` valid
/// bytes in a buffer the codec reuses on its next decode call.
pub struct PicturePlane {
    pub data: Vec<u8>,
    pub linesize: usize,
}

/// A decoder-owned picture. Borrowed from the codec session, so it cannot
/// outlive the next decode call or cross a concurrency boundary; use
/// [`duplicate`] before queueing it downstream.
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub interlaced: bool,
    /// The codec flagged field repetition, which this stage does not
    /// implement. The frame is emitted unmodified with a warning.
    pub repeat_field: bool,
    pub planes: Vec<PicturePlane>,
}

struct FrameData {
    planes: Vec<AlignedBuf>,
    linesizes: Vec<usize>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    interlaced: bool,
}

/// An independently owned video frame, safe to hold indefinitely. Cloning
/// shares the plane storage; the buffers are released exactly once, when
/// the last clone drops.
#[derive(Clone)]
pub struct VideoFrame {
    data: Arc<FrameData>,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.data.width
    }

    pub fn height(&self) -> u32 {
        self.data.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.data.pixel_format
    }

    pub fn interlaced(&self) -> bool {
        self.data.interlaced
    }

    pub fn plane_count(&self) -> usize {
        self.data.planes.len()
    }

    pub fn plane(&self, n: usize) -> &[u8] {
        &self.data.planes[n]
    }

    pub fn linesize(&self, n: usize) -> usize {
        self.data.linesizes[n]
    }

    /// Visible image byte size, computed the same way as
    /// [`VideoFormat::size`](crate::format::VideoFormat::size) so the two
    /// compare directly.
    pub fn size(&self) -> usize {
        let format = self.data.pixel_format;
        (0..format.plane_count())
            .map(|n| {
                format.plane_width_bytes(n, self.data.width)
                    * format.plane_height(n, self.data.height) as usize
            })
            .sum()
    }
}

/// Copies a decoder-owned picture into independently owned, aligned plane
/// buffers. The copy completes fully before this returns; the codec may
/// overwrite its buffers on the next decode call without affecting the
/// duplicate.
pub fn duplicate(picture: &Picture) -> anyhow::Result<VideoFrame> {
    let mut planes = Vec::with_capacity(picture.planes.len());
    let mut linesizes = Vec::with_capacity(picture.planes.len());
    for (n, plane) in picture.planes.iter().enumerate() {
        let height = picture.pixel_format.plane_height(n, picture.height) as usize;
        let size = plane.linesize * height;
        anyhow::ensure!(
            plane.data.len() >= size,
            "plane {} holds {} bytes, needs {}",
            n,
            plane.data.len(),
            size
        );
        planes.push(AlignedBuf::copy_from(&plane.data[..size])?);
        linesizes.push(plane.linesize);
    }

    Ok(VideoFrame {
        data: Arc::new(FrameData {
            planes,
            linesizes,
            width: picture.width,
            height: picture.height,
            pixel_format: picture.pixel_format,
            interlaced: picture.interlaced,
        }),
    })
}
