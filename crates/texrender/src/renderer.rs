use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::canvas::{Canvas, GRADIENT_BOTTOM, GRADIENT_TOP, TEXT_COLOR};
use crate::compile::{create_program, ShaderSources};
use crate::error::RenderError;
use crate::geometry;
use crate::gles::{
    check_gl_error, BufferId, Gles, Primitive, ProgramId, TextureId, UniformLocation,
    CLAMP_TO_EDGE, COLOR_BUFFER_BIT, LINEAR, TEXTURE0, TEXTURE_MAG_FILTER, TEXTURE_MIN_FILTER,
    TEXTURE_WRAP_S, TEXTURE_WRAP_T,
};
use crate::producer::FrameProducer;
use crate::stream::StreamTexture;
use crate::types::{BitmapOptions, FrameStats, RendererState, SamplerTarget, SurfaceConfig};

/// Callbacks a host drives on its render thread, in this order: one
/// `on_surface_created`, any number of `on_surface_changed`, then draws.
/// A host that loses its context starts over with `on_surface_created`.
pub trait SurfaceRenderer: Send {
    /// Gives the renderer a way to ask the host for another frame. Called
    /// once, before the first `on_surface_created`.
    fn bind_requester(&mut self, _requester: RenderRequester) {}

    fn on_surface_created(
        &mut self,
        gl: &mut dyn Gles,
        config: &SurfaceConfig,
    ) -> Result<(), RenderError>;

    fn on_surface_changed(
        &mut self,
        gl: &mut dyn Gles,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError>;

    fn on_draw_frame(&mut self, gl: &mut dyn Gles) -> Result<(), RenderError>;
}

/// Asks the host for a render. Cheap to clone and callable from any thread.
#[derive(Clone)]
pub struct RenderRequester(Arc<dyn Fn() + Send + Sync>);

impl RenderRequester {
    pub fn new(request: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(request))
    }

    /// A requester nobody listens to.
    pub fn detached() -> Self {
        Self::new(|| {})
    }

    pub fn request(&self) {
        (self.0)()
    }
}

impl Default for RenderRequester {
    fn default() -> Self {
        Self::detached()
    }
}

impl fmt::Debug for RenderRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RenderRequester")
    }
}

/// Where the sampled texture's contents come from.
pub enum TextureSource {
    /// Frames written by a producer into the stream's surface, latched once
    /// per draw.
    ExternalProducer(Box<dyn FrameProducer>),
    /// A gradient with text drawn in software and latched once at setup.
    GeneratedBitmap(BitmapOptions),
}

impl TextureSource {
    pub fn producer(producer: impl FrameProducer + 'static) -> Self {
        TextureSource::ExternalProducer(Box::new(producer))
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextureSource::ExternalProducer(_) => "producer",
            TextureSource::GeneratedBitmap(_) => "generated",
        }
    }
}

impl fmt::Debug for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureSource::ExternalProducer(_) => f.write_str("ExternalProducer(..)"),
            TextureSource::GeneratedBitmap(options) => {
                f.debug_tuple("GeneratedBitmap").field(options).finish()
            }
        }
    }
}

/// Resolved program inputs. Only stored once all three lookups succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLocations {
    pub position: u32,
    pub texture_coord: u32,
    pub sampler: UniformLocation,
}

/// Draws one stream texture over the whole surface.
pub struct FrameRenderer {
    source: TextureSource,
    sampler: SamplerTarget,
    shaders: ShaderSources,
    requester: RenderRequester,
    state: RendererState,
    program: Option<ProgramId>,
    locations: Option<ProgramLocations>,
    buffers: Option<[BufferId; 2]>,
    texture: Option<TextureId>,
    stream: Option<StreamTexture>,
    viewport: Option<(u32, u32)>,
    stats: FrameStats,
}

impl FrameRenderer {
    pub fn new(source: TextureSource, sampler: SamplerTarget) -> Self {
        Self {
            source,
            sampler,
            shaders: ShaderSources::for_target(sampler),
            requester: RenderRequester::detached(),
            state: RendererState::Uninitialized,
            program: None,
            locations: None,
            buffers: None,
            texture: None,
            stream: None,
            viewport: None,
            stats: FrameStats::default(),
        }
    }

    /// Overrides the shader pair linked on surface-created.
    pub fn with_shader_sources(mut self, shaders: ShaderSources) -> Self {
        self.shaders = shaders;
        self
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn sampler(&self) -> SamplerTarget {
        self.sampler
    }

    pub fn source(&self) -> &TextureSource {
        &self.source
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn locations(&self) -> Option<ProgramLocations> {
        self.locations
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn vertex_buffers(&self) -> Option<[BufferId; 2]> {
        self.buffers
    }

    /// The live stream texture, external-producer source only.
    pub fn stream(&self) -> Option<&StreamTexture> {
        self.stream.as_ref()
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.release();
        }
    }

    fn resolve_locations(
        &self,
        gl: &mut dyn Gles,
        program: ProgramId,
    ) -> Result<ProgramLocations, RenderError> {
        let position = gl.attrib_location(program, "aPosition");
        check_gl_error(gl, "glGetAttribLocation aPosition")?;
        let position = position.ok_or_else(|| missing_attribute("aPosition"))?;

        let texture_coord = gl.attrib_location(program, "aTextureCoord");
        check_gl_error(gl, "glGetAttribLocation aTextureCoord")?;
        let texture_coord = texture_coord.ok_or_else(|| missing_attribute("aTextureCoord"))?;

        let sampler = gl.uniform_location(program, "sTexture");
        check_gl_error(gl, "glGetUniformLocation sTexture")?;
        let sampler = sampler.ok_or_else(|| {
            error!("could not get uniform location for sTexture");
            RenderError::MissingUniform("sTexture")
        })?;

        Ok(ProgramLocations {
            position,
            texture_coord,
            sampler,
        })
    }

    fn upload_quad(
        &self,
        gl: &mut dyn Gles,
        locations: &ProgramLocations,
    ) -> Result<[BufferId; 2], RenderError> {
        gl.enable_vertex_attrib_array(locations.position);
        gl.enable_vertex_attrib_array(locations.texture_coord);

        let positions = gl.create_buffer().ok_or(RenderError::Allocation("buffer"))?;
        gl.bind_array_buffer(Some(positions));
        gl.array_buffer_data(geometry::position_bytes());
        gl.vertex_attrib_pointer_f32(
            locations.position,
            geometry::POSITION_COMPONENTS,
            geometry::POSITION_COMPONENTS * 4,
            0,
        );

        let texcoords = gl.create_buffer().ok_or(RenderError::Allocation("buffer"))?;
        gl.bind_array_buffer(Some(texcoords));
        gl.array_buffer_data(geometry::texcoord_bytes());
        gl.vertex_attrib_pointer_f32(
            locations.texture_coord,
            geometry::TEXCOORD_COMPONENTS,
            geometry::TEXCOORD_COMPONENTS * 4,
            0,
        );
        gl.bind_array_buffer(None);
        check_gl_error(gl, "bind vao")?;
        Ok([positions, texcoords])
    }

    fn create_texture(
        &self,
        gl: &mut dyn Gles,
        program: ProgramId,
        sampler: UniformLocation,
    ) -> Result<TextureId, RenderError> {
        let texture = gl.create_texture().ok_or(RenderError::Allocation("texture"))?;
        check_gl_error(gl, "gen textures")?;

        let target = self.sampler.texture_target();
        gl.active_texture(TEXTURE0);
        gl.bind_texture(target, Some(texture));
        gl.tex_parameter_i32(target, TEXTURE_MIN_FILTER, LINEAR);
        gl.tex_parameter_i32(target, TEXTURE_MAG_FILTER, LINEAR);
        gl.tex_parameter_i32(target, TEXTURE_WRAP_S, CLAMP_TO_EDGE);
        gl.tex_parameter_i32(target, TEXTURE_WRAP_T, CLAMP_TO_EDGE);
        check_gl_error(gl, "glTexParameter")?;

        gl.use_program(Some(program));
        gl.uniform_1_i32(sampler, 0);
        check_gl_error(gl, "glUniform1i sTexture")?;
        Ok(texture)
    }

    fn attach_source(&mut self, gl: &mut dyn Gles, texture: TextureId) -> Result<(), RenderError> {
        let target = self.sampler.texture_target();
        match &mut self.source {
            TextureSource::ExternalProducer(producer) => {
                let stream = StreamTexture::new(texture, target);
                let requester = self.requester.clone();
                stream.set_on_frame_available(Arc::new(move || {
                    debug!("frame available");
                    requester.request();
                }));
                let surface = stream.surface();
                self.stream = Some(stream);
                producer.submit_surface(surface)?;
            }
            TextureSource::GeneratedBitmap(options) => {
                let stream = StreamTexture::new(texture, target);
                stream.set_default_buffer_size(options.width, options.height)?;
                let surface = stream.surface();
                let mut buffer = surface.lock()?;
                {
                    let mut canvas = Canvas::new(&mut buffer)?;
                    canvas.fill_vertical_gradient(GRADIENT_TOP, GRADIENT_BOTTOM);
                    canvas.draw_text_centered(TEXT_COLOR, &options.text);
                }
                surface.unlock_and_post(buffer)?;
                stream.update_tex_image(gl)?;
                stream.release();
                debug!(
                    width = options.width,
                    height = options.height,
                    "generated bitmap latched"
                );
            }
        }
        Ok(())
    }
}

fn missing_attribute(name: &'static str) -> RenderError {
    error!("could not get attrib location for {name}");
    RenderError::MissingAttribute(name)
}

impl SurfaceRenderer for FrameRenderer {
    fn bind_requester(&mut self, requester: RenderRequester) {
        self.requester = requester;
    }

    fn on_surface_created(
        &mut self,
        gl: &mut dyn Gles,
        config: &SurfaceConfig,
    ) -> Result<(), RenderError> {
        if config.client_version != 2 {
            error!(version = config.client_version, "unsupported GL ES client version");
            return Err(RenderError::UnsupportedClientVersion(config.client_version));
        }
        self.release_stream();
        self.state = RendererState::Uninitialized;
        self.program = None;
        self.locations = None;
        self.buffers = None;
        self.texture = None;

        let program = create_program(gl, &self.shaders).map_err(|err| {
            error!(%err, "failed to create program");
            RenderError::CreateProgram(err)
        })?;
        self.program = Some(program);

        let locations = self.resolve_locations(gl, program)?;
        self.locations = Some(locations);

        self.buffers = Some(self.upload_quad(gl, &locations)?);
        let texture = self.create_texture(gl, program, locations.sampler)?;
        self.texture = Some(texture);
        self.attach_source(gl, texture)?;

        self.state = RendererState::SurfaceReady;
        self.stats.surfaces_created += 1;
        info!(
            width = config.width,
            height = config.height,
            source = self.source.name(),
            sampler = %self.sampler,
            "surface created"
        );
        Ok(())
    }

    fn on_surface_changed(
        &mut self,
        gl: &mut dyn Gles,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        let too_large = || RenderError::ViewportTooLarge { width, height };
        let gl_width = i32::try_from(width).map_err(|_| too_large())?;
        let gl_height = i32::try_from(height).map_err(|_| too_large())?;
        gl.viewport(0, 0, gl_width, gl_height);
        self.viewport = Some((width, height));
        if self.state != RendererState::Uninitialized {
            self.state = RendererState::SurfaceChanged;
        }
        debug!(width, height, "surface changed");
        Ok(())
    }

    fn on_draw_frame(&mut self, gl: &mut dyn Gles) -> Result<(), RenderError> {
        let (Some(program), Some(texture)) = (self.program, self.texture) else {
            return Err(RenderError::NotInitialized);
        };
        if self.state == RendererState::Uninitialized {
            return Err(RenderError::NotInitialized);
        }

        gl.clear_color(0.0, 1.0, 0.0, 0.0);
        gl.clear(COLOR_BUFFER_BIT);
        gl.use_program(Some(program));
        gl.active_texture(TEXTURE0);
        gl.bind_texture(self.sampler.texture_target(), Some(texture));

        if let TextureSource::ExternalProducer(producer) = &mut self.source {
            if let Some(stream) = &self.stream {
                if let Some(frame) = stream.update_tex_image(gl)? {
                    self.stats.frames_latched += 1;
                    self.stats.frames_dropped += frame.dropped;
                }
            }
            producer.consume_frame()?;
        }

        gl.draw_arrays(Primitive::TriangleFan, 0, geometry::QUAD_VERTEX_COUNT);
        check_gl_error(gl, "onDrawFrame")?;

        self.state = RendererState::Rendering;
        self.stats.frames_drawn += 1;
        Ok(())
    }
}

impl Drop for FrameRenderer {
    fn drop(&mut self) {
        self.release_stream();
    }
}

impl fmt::Debug for FrameRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRenderer")
            .field("source", &self.source)
            .field("sampler", &self.sampler)
            .field("state", &self.state)
            .field("program", &self.program)
            .field("texture", &self.texture)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gles::{GlCall, RecordingGles, INVALID_ENUM};
    use crate::producer::StripeProducer;

    fn created(source: TextureSource) -> (RecordingGles, FrameRenderer) {
        let mut gl = RecordingGles::new(8, 8);
        let mut renderer = FrameRenderer::new(source, SamplerTarget::External);
        renderer
            .on_surface_created(&mut gl, &SurfaceConfig::new(8, 8))
            .unwrap();
        (gl, renderer)
    }

    #[test]
    fn draw_before_create_is_rejected() {
        let mut gl = RecordingGles::new(8, 8);
        let mut renderer = FrameRenderer::new(
            TextureSource::GeneratedBitmap(BitmapOptions::default()),
            SamplerTarget::External,
        );
        assert!(matches!(
            renderer.on_draw_frame(&mut gl),
            Err(RenderError::NotInitialized)
        ));
        assert!(gl.draw_calls().is_empty());
    }

    #[test]
    fn other_client_versions_are_rejected_before_any_gl_call() {
        let mut gl = RecordingGles::new(8, 8);
        let mut renderer = FrameRenderer::new(
            TextureSource::producer(StripeProducer::new()),
            SamplerTarget::External,
        );
        let config = SurfaceConfig {
            client_version: 3,
            ..SurfaceConfig::new(8, 8)
        };
        assert!(matches!(
            renderer.on_surface_created(&mut gl, &config),
            Err(RenderError::UnsupportedClientVersion(3))
        ));
        assert!(gl.calls().is_empty());
        assert_eq!(renderer.state(), RendererState::Uninitialized);
    }

    #[test]
    fn oversized_viewport_is_an_error() {
        let (mut gl, mut renderer) = created(TextureSource::producer(StripeProducer::new()));
        gl.take_calls();
        let err = renderer
            .on_surface_changed(&mut gl, u32::MAX, 8)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::ViewportTooLarge {
                width: u32::MAX,
                height: 8
            }
        ));
        assert!(gl.calls().is_empty());
        assert_eq!(renderer.viewport(), None);
    }

    #[test]
    fn setup_binds_sampler_to_unit_zero_with_linear_clamp() {
        let (gl, renderer) = created(TextureSource::producer(StripeProducer::new()));
        let program = renderer.program().unwrap();
        let locations = renderer.locations().unwrap();
        assert_eq!((locations.position, locations.texture_coord), (0, 1));
        assert_eq!(gl.uniform_value(program, locations.sampler), Some(0));

        let texture = renderer.texture().unwrap();
        assert_eq!(gl.texture_parameter(texture, TEXTURE_MIN_FILTER), Some(LINEAR));
        assert_eq!(gl.texture_parameter(texture, TEXTURE_WRAP_T), Some(CLAMP_TO_EDGE));
        assert_eq!(renderer.state(), RendererState::SurfaceReady);
    }

    #[test]
    fn exactly_one_texture_is_generated_per_surface() {
        let (gl, _renderer) = created(TextureSource::producer(StripeProducer::new()));
        let generated = gl
            .calls()
            .iter()
            .filter(|call| matches!(call, GlCall::CreateTexture { .. }))
            .count();
        assert_eq!(generated, 1);
    }

    #[test]
    fn producer_frames_are_latched_on_the_next_draw() {
        let (mut gl, mut renderer) = created(TextureSource::producer(StripeProducer::new()));
        renderer.on_draw_frame(&mut gl).unwrap();
        assert_eq!(renderer.stats().frames_latched, 0);
        renderer.on_draw_frame(&mut gl).unwrap();
        assert_eq!(renderer.stats().frames_latched, 1);
        assert_eq!(renderer.stats().frames_drawn, 2);
        assert_eq!(renderer.state(), RendererState::Rendering);
    }

    #[test]
    fn frame_available_requests_a_render() {
        let requests = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let mut gl = RecordingGles::new(8, 8);
        let mut renderer = FrameRenderer::new(
            TextureSource::producer(StripeProducer::new()),
            SamplerTarget::External,
        );
        renderer.bind_requester(RenderRequester::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        renderer
            .on_surface_created(&mut gl, &SurfaceConfig::new(8, 8))
            .unwrap();
        renderer.on_draw_frame(&mut gl).unwrap();
        assert_eq!(requests.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn gl_error_after_draw_fails_the_frame() {
        let (mut gl, mut renderer) = created(TextureSource::producer(StripeProducer::new()));
        gl.push_error(INVALID_ENUM);
        let err = renderer.on_draw_frame(&mut gl).unwrap_err();
        let RenderError::Gl(gl_err) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(gl_err.op, "onDrawFrame");
    }

    #[test]
    fn sampler_2d_configuration_uses_texture_2d() {
        let mut gl = RecordingGles::new(8, 8);
        let mut renderer = FrameRenderer::new(
            TextureSource::GeneratedBitmap(BitmapOptions::default()),
            SamplerTarget::Texture2d,
        );
        renderer
            .on_surface_created(&mut gl, &SurfaceConfig::new(8, 8))
            .unwrap();
        let texture = renderer.texture().unwrap();
        assert_eq!(
            gl.texture_target(texture),
            Some(crate::gles::TextureTarget::Texture2d)
        );
    }
}
