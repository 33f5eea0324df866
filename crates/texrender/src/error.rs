use crate::gles::ShaderKind;
use crate::stream::SurfaceError;

/// A non-empty GL error flag observed after `op`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{op}: glError {code}")]
pub struct GlError {
    pub op: String,
    /// First code returned by `glGetError`.
    pub code: u32,
    /// Codes drained after the first one.
    pub drained: Vec<u32>,
}

/// Failures while turning shader sources into a linked program.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("glCreateShader returned 0 for the {0} shader")]
    CreateShader(ShaderKind),
    #[error("could not compile {kind} shader: {log}")]
    Compile { kind: ShaderKind, log: String },
    #[error("glCreateProgram returned 0")]
    CreateProgram,
    #[error("could not link program: {log}")]
    Link { log: String },
    #[error(transparent)]
    Gl(#[from] GlError),
}

/// Errors raised by a frame producer.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("no surface has been handed to the producer")]
    NoSurface,
    #[error("buffer width {0} is not a multiple of 4 pixels")]
    UnalignedWidth(u32),
    #[error("producer thread is gone")]
    Disconnected,
    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Everything that can stop the renderer. All of it is fatal to the current
/// surface; the host decides what happens to the process.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create program: {0}")]
    CreateProgram(#[source] ShaderError),
    #[error("could not get attrib location for {0}")]
    MissingAttribute(&'static str),
    #[error("could not get uniform location for {0}")]
    MissingUniform(&'static str),
    #[error("GL returned no name for {0}")]
    Allocation(&'static str),
    #[error("GL ES {0} was requested; only GL ES 2 is supported")]
    UnsupportedClientVersion(u32),
    #[error("viewport {width}x{height} does not fit GL's signed sizes")]
    ViewportTooLarge { width: u32, height: u32 },
    #[error("renderer used before the surface was created")]
    NotInitialized,
    #[error(transparent)]
    Gl(#[from] GlError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("frame producer failed: {0}")]
    Producer(#[from] ProducerError),
}
