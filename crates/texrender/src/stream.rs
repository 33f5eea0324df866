//! Stream textures: a single-slot buffer queue between a producer-side
//! [`Surface`] and a consumer-side [`StreamTexture`] bound to a GL texture.
//!
//! The queue is latest-wins. Posting while a buffer is still pending replaces
//! it and counts the replaced one as dropped. Every post fires the
//! frame-available listener on the posting thread, outside the queue lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RenderError;
use crate::gles::{check_gl_error, Gles, TextureId, TextureTarget};

/// Called once per posted buffer, from whichever thread posted it.
pub type FrameAvailableListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface has been abandoned")]
    Abandoned,
    #[error("invalid buffer geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
    #[error("buffer is {actual:?} but the surface expects {expected:?}")]
    GeometryMismatch {
        expected: BufferGeometry,
        actual: BufferGeometry,
    },
    #[error("surface is already locked")]
    AlreadyLocked,
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8888,
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
            PixelFormat::Rgb565 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl BufferGeometry {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidGeometry { width, height });
        }
        Ok(Self {
            width,
            height,
            format,
        })
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// A locked producer buffer. Rows are tightly packed, so the stride (in
/// pixels) always equals the width.
pub struct SurfaceBuffer {
    geometry: BufferGeometry,
    bits: Vec<u8>,
}

impl SurfaceBuffer {
    fn zeroed(geometry: BufferGeometry) -> Self {
        Self {
            geometry,
            bits: vec![0; geometry.byte_len()],
        }
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn stride(&self) -> u32 {
        self.geometry.width
    }

    pub fn format(&self) -> PixelFormat {
        self.geometry.format
    }

    pub fn geometry(&self) -> BufferGeometry {
        self.geometry
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn bits_mut(&mut self) -> &mut [u8] {
        &mut self.bits
    }

    /// Expands the buffer to tightly packed RGBA8 rows for upload.
    fn to_rgba(&self) -> Vec<u8> {
        match self.geometry.format {
            PixelFormat::Rgba8888 => self.bits.clone(),
            PixelFormat::Rgb565 => self
                .bits
                .chunks_exact(2)
                .flat_map(|texel| {
                    let value = u16::from_le_bytes([texel[0], texel[1]]);
                    let r = ((value >> 11) & 0x1F) as u8;
                    let g = ((value >> 5) & 0x3F) as u8;
                    let b = (value & 0x1F) as u8;
                    [r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2, 0xFF]
                })
                .collect(),
        }
    }
}

impl fmt::Debug for SurfaceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceBuffer")
            .field("geometry", &self.geometry)
            .field("len", &self.bits.len())
            .finish()
    }
}

/// What a latch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// 1-based index of the latched buffer among all posted buffers.
    pub sequence: u64,
    /// Buffers replaced in the slot since the previous latch.
    pub dropped: u64,
}

struct QueueState {
    geometry: BufferGeometry,
    pending: Option<(u64, SurfaceBuffer)>,
    locked: bool,
    abandoned: bool,
    posted: u64,
    dropped_since_latch: u64,
    releases: usize,
}

struct Shared {
    queue: Mutex<QueueState>,
    listener: Mutex<Option<FrameAvailableListener>>,
}

/// Consumer side of a stream, bound to one texture name.
pub struct StreamTexture {
    texture: TextureId,
    target: TextureTarget,
    shared: Arc<Shared>,
}

impl StreamTexture {
    /// Creates a stream that latches into `texture` on `target`. Buffers
    /// default to 1x1 RGBA until a size is configured.
    pub fn new(texture: TextureId, target: TextureTarget) -> Self {
        let geometry = BufferGeometry {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8888,
        };
        Self {
            texture,
            target,
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    geometry,
                    pending: None,
                    locked: false,
                    abandoned: false,
                    posted: 0,
                    dropped_since_latch: 0,
                    releases: 0,
                }),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Size of buffers handed out by [`Surface::lock`] until the producer
    /// overrides it with [`Surface::set_buffers_geometry`].
    pub fn set_default_buffer_size(&self, width: u32, height: u32) -> Result<(), SurfaceError> {
        let mut queue = self.shared.queue.lock();
        if queue.abandoned {
            return Err(SurfaceError::Abandoned);
        }
        queue.geometry = BufferGeometry::new(width, height, queue.geometry.format)?;
        Ok(())
    }

    pub fn set_on_frame_available(&self, listener: FrameAvailableListener) {
        *self.shared.listener.lock() = Some(listener);
    }

    /// Producer-side handle. Any number may exist; all of them share this
    /// stream's queue.
    pub fn surface(&self) -> Surface {
        Surface {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Uploads the newest pending buffer into the bound texture.
    ///
    /// Returns `Ok(None)` when nothing was posted since the last latch.
    pub fn update_tex_image(&self, gl: &mut dyn Gles) -> Result<Option<FrameInfo>, RenderError> {
        let (sequence, buffer, dropped) = {
            let mut queue = self.shared.queue.lock();
            if queue.abandoned {
                return Err(SurfaceError::Abandoned.into());
            }
            match queue.pending.take() {
                None => return Ok(None),
                Some((sequence, buffer)) => {
                    let dropped = std::mem::take(&mut queue.dropped_since_latch);
                    (sequence, buffer, dropped)
                }
            }
        };

        let rgba = buffer.to_rgba();
        gl.bind_texture(self.target, Some(self.texture));
        gl.tex_image_2d_rgba(self.target, buffer.width(), buffer.height(), &rgba);
        check_gl_error(gl, "updateTexImage")?;

        tracing::trace!(sequence, dropped, "latched stream buffer");
        Ok(Some(FrameInfo { sequence, dropped }))
    }

    /// Abandons the queue. Only the first call has any effect.
    pub fn release(&self) {
        let released = {
            let mut queue = self.shared.queue.lock();
            if queue.abandoned {
                false
            } else {
                queue.abandoned = true;
                queue.pending = None;
                queue.releases += 1;
                true
            }
        };
        if released {
            self.shared.listener.lock().take();
            tracing::debug!(texture = %self.texture, "stream texture released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.shared.queue.lock().abandoned
    }

    /// Number of effective releases; never exceeds one.
    pub fn release_count(&self) -> usize {
        self.shared.queue.lock().releases
    }
}

impl Drop for StreamTexture {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for StreamTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTexture")
            .field("texture", &self.texture)
            .field("target", &self.target)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Producer-side handle of a [`StreamTexture`].
#[derive(Clone)]
pub struct Surface {
    shared: Arc<Shared>,
}

impl Surface {
    pub fn set_buffers_geometry(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), SurfaceError> {
        let geometry = BufferGeometry::new(width, height, format)?;
        let mut queue = self.shared.queue.lock();
        if queue.abandoned {
            return Err(SurfaceError::Abandoned);
        }
        queue.geometry = geometry;
        Ok(())
    }

    pub fn geometry(&self) -> BufferGeometry {
        self.shared.queue.lock().geometry
    }

    /// Dequeues a zeroed buffer with the current geometry.
    pub fn lock(&self) -> Result<SurfaceBuffer, SurfaceError> {
        let mut queue = self.shared.queue.lock();
        if queue.abandoned {
            return Err(SurfaceError::Abandoned);
        }
        if queue.locked {
            return Err(SurfaceError::AlreadyLocked);
        }
        queue.locked = true;
        Ok(SurfaceBuffer::zeroed(queue.geometry))
    }

    /// Queues `buffer` for the consumer and notifies the listener.
    pub fn unlock_and_post(&self, buffer: SurfaceBuffer) -> Result<(), SurfaceError> {
        {
            let mut queue = self.shared.queue.lock();
            queue.locked = false;
            if queue.abandoned {
                return Err(SurfaceError::Abandoned);
            }
            if buffer.geometry != queue.geometry {
                return Err(SurfaceError::GeometryMismatch {
                    expected: queue.geometry,
                    actual: buffer.geometry,
                });
            }
            queue.posted += 1;
            let sequence = queue.posted;
            if queue.pending.replace((sequence, buffer)).is_some() {
                queue.dropped_since_latch += 1;
            }
        }

        let listener = self.shared.listener.lock().clone();
        if let Some(listener) = listener {
            listener();
        }
        Ok(())
    }

    pub fn is_abandoned(&self) -> bool {
        self.shared.queue.lock().abandoned
    }

    /// Effective releases of the owning stream texture.
    pub fn release_count(&self) -> usize {
        self.shared.queue.lock().releases
    }

    /// Whether two handles feed the same stream.
    pub fn same_stream(&self, other: &Surface) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("Surface")
            .field("geometry", &queue.geometry)
            .field("abandoned", &queue.abandoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::gles::RecordingGles;

    fn stream() -> (RecordingGles, StreamTexture) {
        let mut gl = RecordingGles::new(8, 8);
        let texture = gl.create_texture().unwrap();
        (gl, StreamTexture::new(texture, TextureTarget::Texture2d))
    }

    fn post_filled(surface: &Surface, value: u8) {
        let mut buffer = surface.lock().unwrap();
        buffer.bits_mut().fill(value);
        surface.unlock_and_post(buffer).unwrap();
    }

    #[test]
    fn latch_without_post_returns_none() {
        let (mut gl, stream) = stream();
        assert!(stream.update_tex_image(&mut gl).unwrap().is_none());
    }

    #[test]
    fn newest_buffer_wins() {
        let (mut gl, stream) = stream();
        let surface = stream.surface();
        surface
            .set_buffers_geometry(2, 1, PixelFormat::Rgba8888)
            .unwrap();

        post_filled(&surface, 10);
        post_filled(&surface, 20);
        post_filled(&surface, 30);

        let info = stream.update_tex_image(&mut gl).unwrap().unwrap();
        assert_eq!(info, FrameInfo { sequence: 3, dropped: 2 });
        assert_eq!(gl.texture_pixels(stream.texture()).unwrap(), &[30; 8]);
        assert!(stream.update_tex_image(&mut gl).unwrap().is_none());
    }

    #[test]
    fn every_post_notifies_the_listener() {
        let (_gl, stream) = stream();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        stream.set_on_frame_available(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let surface = stream.surface();
        post_filled(&surface, 1);
        post_filled(&surface, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn release_abandons_every_surface_clone_once() {
        let (mut gl, stream) = stream();
        let surface = stream.surface();
        let clone = surface.clone();
        assert!(surface.same_stream(&clone));

        stream.release();
        stream.release();
        assert_eq!(stream.release_count(), 1);
        assert!(clone.is_abandoned());
        assert_eq!(surface.lock().unwrap_err(), SurfaceError::Abandoned);
        assert!(matches!(
            stream.update_tex_image(&mut gl),
            Err(RenderError::Surface(SurfaceError::Abandoned))
        ));
    }

    #[test]
    fn dropping_the_stream_abandons_the_surface() {
        let (_gl, stream) = stream();
        let surface = stream.surface();
        drop(stream);
        assert!(surface.is_abandoned());
    }

    #[test]
    fn geometry_is_validated() {
        let (_gl, stream) = stream();
        let surface = stream.surface();
        assert_eq!(
            surface.set_buffers_geometry(0, 480, PixelFormat::Rgba8888),
            Err(SurfaceError::InvalidGeometry {
                width: 0,
                height: 480
            })
        );

        let buffer = surface.lock().unwrap();
        surface
            .set_buffers_geometry(4, 4, PixelFormat::Rgba8888)
            .unwrap();
        assert!(matches!(
            surface.unlock_and_post(buffer),
            Err(SurfaceError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn double_lock_is_rejected() {
        let (_gl, stream) = stream();
        let surface = stream.surface();
        let _held = surface.lock().unwrap();
        assert_eq!(surface.lock().unwrap_err(), SurfaceError::AlreadyLocked);
    }

    #[test]
    fn rgb565_expands_on_latch() {
        let (mut gl, stream) = stream();
        let surface = stream.surface();
        surface.set_buffers_geometry(1, 1, PixelFormat::Rgb565).unwrap();
        let mut buffer = surface.lock().unwrap();
        assert_eq!(buffer.bits().len(), 2);
        buffer.bits_mut().copy_from_slice(&0xF800u16.to_le_bytes());
        surface.unlock_and_post(buffer).unwrap();

        stream.update_tex_image(&mut gl).unwrap();
        assert_eq!(
            gl.texture_pixels(stream.texture()).unwrap(),
            &[255, 0, 0, 255]
        );
    }
}
