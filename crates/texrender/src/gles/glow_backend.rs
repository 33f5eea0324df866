use glow::HasContext;

use super::{
    BufferId, Gles, Primitive, ProgramId, ShaderId, ShaderKind, TextureId, TextureTarget,
    UniformLocation,
};

/// [`Gles`] over a real driver.
///
/// The wrapped `glow::Context` must stay current on the calling thread for as
/// long as this value is used; [`crate::egl::HeadlessEgl`] guarantees that by
/// owning both and never leaving the render thread.
pub struct GlowGles {
    gl: glow::Context,
}

impl GlowGles {
    /// # Safety
    ///
    /// `gl` must have been loaded for a context that is current on this
    /// thread.
    pub unsafe fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }
}

fn shader(id: ShaderId) -> glow::Shader {
    glow::NativeShader(id.0)
}

fn program(id: ProgramId) -> glow::Program {
    glow::NativeProgram(id.0)
}

fn texture(id: TextureId) -> glow::Texture {
    glow::NativeTexture(id.0)
}

fn buffer(id: BufferId) -> glow::Buffer {
    glow::NativeBuffer(id.0)
}

impl Gles for GlowGles {
    fn create_shader(&mut self, kind: ShaderKind) -> Option<ShaderId> {
        let created = unsafe { self.gl.create_shader(kind.gl_enum()) };
        created.ok().map(|native| ShaderId(native.0))
    }

    fn shader_source(&mut self, id: ShaderId, source: &str) {
        unsafe { self.gl.shader_source(shader(id), source) }
    }

    fn compile_shader(&mut self, id: ShaderId) {
        unsafe { self.gl.compile_shader(shader(id)) }
    }

    fn shader_compile_status(&mut self, id: ShaderId) -> bool {
        unsafe { self.gl.get_shader_compile_status(shader(id)) }
    }

    fn shader_info_log(&mut self, id: ShaderId) -> String {
        unsafe { self.gl.get_shader_info_log(shader(id)) }
    }

    fn delete_shader(&mut self, id: ShaderId) {
        unsafe { self.gl.delete_shader(shader(id)) }
    }

    fn create_program(&mut self) -> Option<ProgramId> {
        let created = unsafe { self.gl.create_program() };
        created.ok().map(|native| ProgramId(native.0))
    }

    fn attach_shader(&mut self, id: ProgramId, shader_id: ShaderId) {
        unsafe { self.gl.attach_shader(program(id), shader(shader_id)) }
    }

    fn link_program(&mut self, id: ProgramId) {
        unsafe { self.gl.link_program(program(id)) }
    }

    fn program_link_status(&mut self, id: ProgramId) -> bool {
        unsafe { self.gl.get_program_link_status(program(id)) }
    }

    fn program_info_log(&mut self, id: ProgramId) -> String {
        unsafe { self.gl.get_program_info_log(program(id)) }
    }

    fn delete_program(&mut self, id: ProgramId) {
        unsafe { self.gl.delete_program(program(id)) }
    }

    fn use_program(&mut self, id: Option<ProgramId>) {
        unsafe { self.gl.use_program(id.map(program)) }
    }

    fn attrib_location(&mut self, id: ProgramId, name: &str) -> Option<u32> {
        unsafe { self.gl.get_attrib_location(program(id), name) }
    }

    fn uniform_location(&mut self, id: ProgramId, name: &str) -> Option<UniformLocation> {
        let location = unsafe { self.gl.get_uniform_location(program(id), name) };
        location.map(|native| UniformLocation(native.0))
    }

    fn uniform_1_i32(&mut self, location: UniformLocation, value: i32) {
        let native = glow::NativeUniformLocation(location.0);
        unsafe { self.gl.uniform_1_i32(Some(&native), value) }
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) }
    }

    fn create_buffer(&mut self) -> Option<BufferId> {
        let created = unsafe { self.gl.create_buffer() };
        created.ok().map(|native| BufferId(native.0))
    }

    fn bind_array_buffer(&mut self, id: Option<BufferId>) {
        unsafe { self.gl.bind_buffer(glow::ARRAY_BUFFER, id.map(buffer)) }
    }

    fn array_buffer_data(&mut self, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, data, glow::STATIC_DRAW)
        }
    }

    fn vertex_attrib_pointer_f32(&mut self, index: u32, size: i32, stride: i32, offset: i32) {
        unsafe {
            self.gl
                .vertex_attrib_pointer_f32(index, size, glow::FLOAT, false, stride, offset)
        }
    }

    fn create_texture(&mut self) -> Option<TextureId> {
        let created = unsafe { self.gl.create_texture() };
        created.ok().map(|native| TextureId(native.0))
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(unit) }
    }

    fn bind_texture(&mut self, target: TextureTarget, id: Option<TextureId>) {
        unsafe { self.gl.bind_texture(target.gl_enum(), id.map(texture)) }
    }

    fn tex_parameter_i32(&mut self, target: TextureTarget, parameter: u32, value: i32) {
        unsafe { self.gl.tex_parameter_i32(target.gl_enum(), parameter, value) }
    }

    fn tex_image_2d_rgba(&mut self, target: TextureTarget, width: u32, height: u32, pixels: &[u8]) {
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                target.gl_enum(),
                0,
                glow::RGBA as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(pixels)),
            );
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn clear_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        unsafe { self.gl.clear_color(red, green, blue, alpha) }
    }

    fn clear(&mut self, mask: u32) {
        unsafe { self.gl.clear(mask) }
    }

    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(mode.gl_enum(), first, count) }
    }

    fn finish(&mut self) {
        unsafe { self.gl.finish() }
    }

    fn get_error(&mut self) -> u32 {
        unsafe { self.gl.get_error() }
    }

    fn read_pixels_rgba(&mut self, x: i32, y: i32, width: u32, height: u32) -> Vec<u8> {
        let mut pixels = vec![0; width as usize * height as usize * 4];
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                x,
                y,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut pixels)),
            );
        }
        pixels
    }
}
