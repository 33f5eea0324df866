//! GL ES 2.0 harness that draws a stream texture over a whole surface.
//!
//! A [`FrameRenderer`] owns one program, one texture and a fullscreen quad.
//! Its texture is fed either by an external [`FrameProducer`] writing into a
//! [`Surface`], or by a bitmap drawn in software once at setup. The flow is:
//!
//! ```text
//!   SurfaceHost (render thread, owns the context)
//!      │ on_surface_created ─▶ compile + link ─▶ locations ─▶ quad VBOs ─▶ texture
//!      │                                                       │
//!      │                                  StreamTexture ◀──────┘
//!      │                                    │  surface()
//!      │                                    ▼
//!      │                              FrameProducer ── unlock_and_post ──▶ frame available
//!      │                                                                      │
//!      │ on_draw_frame ◀──────────────────── request render ◀─────────────────┘
//!      │   clear ─▶ update_tex_image ─▶ consume_frame ─▶ draw fan ─▶ check error
//! ```
//!
//! Every GL call goes through the [`Gles`] trait. [`RecordingGles`] runs the
//! whole pipeline in-process; with the `egl` feature [`HeadlessEgl`] provides
//! a real driver through a pbuffer context.

pub mod canvas;
pub mod compile;
#[cfg(feature = "egl")]
pub mod egl;
pub mod error;
pub mod geometry;
pub mod gles;
pub mod host;
pub mod producer;
pub mod renderer;
pub mod stream;
pub mod types;

pub use compile::ShaderSources;
#[cfg(feature = "egl")]
pub use egl::HeadlessEgl;
pub use error::{GlError, ProducerError, RenderError, ShaderError};
pub use gles::{check_gl_error, Gles, RecordingGles};
pub use host::{HostConfig, HostError, HostReport, HostRun, RenderContext, RenderMode, SurfaceHost};
pub use producer::{FrameProducer, ProducerThread, StripeProducer};
pub use renderer::{FrameRenderer, RenderRequester, SurfaceRenderer, TextureSource};
pub use stream::{FrameInfo, PixelFormat, StreamTexture, Surface, SurfaceBuffer, SurfaceError};
pub use types::{BitmapOptions, FrameStats, RendererState, SamplerTarget, SurfaceConfig};
