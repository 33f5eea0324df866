//! In-process GL backend that records calls and emulates just enough of a
//! driver to validate the renderer without a GPU.
//!
//! Shader "compilation" checks bracket balance, the presence of `main`, and
//! that `samplerExternalOES` is only used behind its extension. Linking checks
//! stage pairing and varyings, then assigns attribute locations in declaration
//! order and uniform locations in first-seen order. Draws are rasterised into
//! a CPU framebuffer (attribute 0 = position, attribute 1 = texcoord) with
//! nearest sampling of the texture bound on the sampler's unit.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{
    BufferId, Gles, Primitive, ProgramId, ShaderId, ShaderKind, TextureId, TextureTarget,
    UniformLocation, COLOR_BUFFER_BIT, INVALID_ENUM, INVALID_OPERATION, INVALID_VALUE, NO_ERROR,
    TEXTURE0,
};

const MAX_VERTEX_ATTRIBS: u32 = 16;
const MAX_TEXTURE_UNITS: u32 = 8;

/// One recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub mode: Primitive,
    pub first: i32,
    pub count: i32,
}

/// A state-changing call as seen by the backend. Pure status/log queries and
/// `glGetError` are not recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    CreateShader { kind: ShaderKind, shader: Option<ShaderId> },
    ShaderSource { shader: ShaderId },
    CompileShader { shader: ShaderId },
    DeleteShader { shader: ShaderId },
    CreateProgram { program: Option<ProgramId> },
    AttachShader { program: ProgramId, shader: ShaderId },
    LinkProgram { program: ProgramId },
    DeleteProgram { program: ProgramId },
    UseProgram { program: Option<ProgramId> },
    GetAttribLocation { program: ProgramId, name: String, location: Option<u32> },
    GetUniformLocation { program: ProgramId, name: String, location: Option<UniformLocation> },
    Uniform1i { location: UniformLocation, value: i32 },
    EnableVertexAttribArray { index: u32 },
    CreateBuffer { buffer: Option<BufferId> },
    BindArrayBuffer { buffer: Option<BufferId> },
    ArrayBufferData { len: usize },
    VertexAttribPointer { index: u32, size: i32, stride: i32, offset: i32 },
    CreateTexture { texture: Option<TextureId> },
    ActiveTexture { unit: u32 },
    BindTexture { target: TextureTarget, texture: Option<TextureId> },
    TexParameter { target: TextureTarget, parameter: u32, value: i32 },
    TexImage2d { target: TextureTarget, width: u32, height: u32 },
    Viewport { x: i32, y: i32, width: i32, height: i32 },
    ClearColor([f32; 4]),
    Clear { mask: u32 },
    DrawArrays(DrawCall),
    Finish,
    ReadPixels { x: i32, y: i32, width: u32, height: u32 },
}

#[derive(Debug)]
struct ShaderRecord {
    kind: ShaderKind,
    source: String,
    compiled: bool,
    log: String,
}

#[derive(Debug, Default)]
struct ProgramRecord {
    shaders: Vec<ShaderId>,
    linked: bool,
    log: String,
    attributes: Vec<String>,
    uniforms: Vec<String>,
    sampler: Option<(TextureTarget, u32)>,
    uniform_values: HashMap<u32, i32>,
}

#[derive(Debug, Default)]
struct TextureRecord {
    target: Option<TextureTarget>,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    parameters: HashMap<u32, i32>,
}

#[derive(Debug, Clone, Copy)]
struct AttribPointer {
    buffer: BufferId,
    size: i32,
    stride: i32,
    offset: i32,
}

/// See the module documentation.
#[derive(Debug)]
pub struct RecordingGles {
    calls: Vec<GlCall>,
    errors: VecDeque<u32>,
    next_name: u32,
    shaders: HashMap<ShaderId, ShaderRecord>,
    programs: HashMap<ProgramId, ProgramRecord>,
    buffers: HashMap<BufferId, Vec<u8>>,
    textures: HashMap<TextureId, TextureRecord>,
    array_buffer: Option<BufferId>,
    bound_textures: HashMap<(u32, TextureTarget), TextureId>,
    active_unit: u32,
    current_program: Option<ProgramId>,
    enabled_attribs: HashSet<u32>,
    attrib_pointers: HashMap<u32, AttribPointer>,
    viewport: [i32; 4],
    clear_color: [f32; 4],
    width: u32,
    height: u32,
    framebuffer: Vec<u8>,
}

impl RecordingGles {
    /// Creates a backend whose default framebuffer is `width`×`height`; the
    /// viewport starts out covering it, as on a freshly made-current context.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            calls: Vec::new(),
            errors: VecDeque::new(),
            next_name: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            array_buffer: None,
            bound_textures: HashMap::new(),
            active_unit: 0,
            current_program: None,
            enabled_attribs: HashSet::new(),
            attrib_pointers: HashMap::new(),
            viewport: [0, 0, width as i32, height as i32],
            clear_color: [0.0; 4],
            width,
            height,
            framebuffer: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Resizes the default framebuffer, discarding its contents.
    pub fn resize_framebuffer(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.framebuffer = vec![0; width as usize * height as usize * 4];
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Queues an error code as if a previous call had raised it.
    pub fn push_error(&mut self, code: u32) {
        self.errors.push_back(code);
    }

    pub fn calls(&self) -> &[GlCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<GlCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                GlCall::DrawArrays(draw) => Some(*draw),
                _ => None,
            })
            .collect()
    }

    pub fn viewport(&self) -> [i32; 4] {
        self.viewport
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    pub fn shader_exists(&self, shader: ShaderId) -> bool {
        self.shaders.contains_key(&shader)
    }

    pub fn program_exists(&self, program: ProgramId) -> bool {
        self.programs.contains_key(&program)
    }

    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn texture_target(&self, texture: TextureId) -> Option<TextureTarget> {
        self.textures.get(&texture).and_then(|record| record.target)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures
            .get(&texture)
            .map(|record| (record.width, record.height))
    }

    /// Level-0 RGBA bytes last specified for `texture`, top row first.
    pub fn texture_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures
            .get(&texture)
            .map(|record| record.pixels.as_slice())
    }

    pub fn texture_parameter(&self, texture: TextureId, parameter: u32) -> Option<i32> {
        self.textures
            .get(&texture)
            .and_then(|record| record.parameters.get(&parameter).copied())
    }

    pub fn uniform_value(&self, program: ProgramId, location: UniformLocation) -> Option<i32> {
        self.programs
            .get(&program)
            .and_then(|record| record.uniform_values.get(&location.0).copied())
    }

    fn raise(&mut self, code: u32) {
        self.errors.push_back(code);
    }

    fn allocate_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn bound_texture(&self, target: TextureTarget) -> Option<TextureId> {
        self.bound_textures
            .get(&(self.active_unit, target))
            .copied()
    }

    fn link(&mut self, program: ProgramId) -> Result<ProgramRecordUpdate, String> {
        let record = self
            .programs
            .get(&program)
            .ok_or_else(|| "unknown program".to_string())?;
        let mut vertex = None;
        let mut fragment = None;
        for shader in &record.shaders {
            let Some(shader) = self.shaders.get(shader) else {
                continue;
            };
            if !shader.compiled {
                return Err(format!(
                    "Link Error: {} shader was not successfully compiled",
                    shader.kind
                ));
            }
            match shader.kind {
                ShaderKind::Vertex => vertex = Some(shader.source.as_str()),
                ShaderKind::Fragment => fragment = Some(shader.source.as_str()),
            }
        }
        let vertex = vertex.ok_or_else(|| "Link Error: Vertex shader is missing".to_string())?;
        let fragment =
            fragment.ok_or_else(|| "Link Error: Fragment shader is missing".to_string())?;

        let written = declarations(vertex, "varying");
        for (_, varying) in declarations(fragment, "varying") {
            if !written.iter().any(|(_, name)| *name == varying) {
                return Err(format!(
                    "Link Error: varying '{varying}' is not written by the vertex shader"
                ));
            }
        }

        let attributes = declarations(vertex, "attribute")
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        let mut uniforms: Vec<(String, String)> = declarations(vertex, "uniform");
        for uniform in declarations(fragment, "uniform") {
            if !uniforms.iter().any(|(_, name)| *name == uniform.1) {
                uniforms.push(uniform);
            }
        }
        let sampler = uniforms
            .iter()
            .enumerate()
            .find_map(|(index, (ty, _))| match ty.as_str() {
                "samplerExternalOES" => Some((TextureTarget::ExternalOes, index as u32)),
                "sampler2D" => Some((TextureTarget::Texture2d, index as u32)),
                _ => None,
            });
        let uniforms = uniforms.into_iter().map(|(_, name)| name).collect();

        Ok(ProgramRecordUpdate {
            attributes,
            uniforms,
            sampler,
        })
    }

    fn fetch_attribute(&self, index: u32, vertex: i32) -> Option<[f32; 4]> {
        if !self.enabled_attribs.contains(&index) {
            return None;
        }
        let pointer = self.attrib_pointers.get(&index)?;
        let data = self.buffers.get(&pointer.buffer)?;
        let stride = if pointer.stride == 0 {
            pointer.size * 4
        } else {
            pointer.stride
        };
        let start = usize::try_from(pointer.offset + vertex * stride).ok()?;
        let mut value = [0.0, 0.0, 0.0, 1.0];
        for (component, slot) in value.iter_mut().enumerate().take(pointer.size as usize) {
            let at = start + component * 4;
            let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
            *slot = f32::from_ne_bytes(bytes);
        }
        Some(value)
    }

    fn sample(&self, program: &ProgramRecord, u: f32, v: f32) -> [u8; 4] {
        const INCOMPLETE: [u8; 4] = [0, 0, 0, 255];
        let Some((target, location)) = program.sampler else {
            return INCOMPLETE;
        };
        let unit = program
            .uniform_values
            .get(&location)
            .copied()
            .unwrap_or(0)
            .max(0) as u32;
        let Some(texture) = self
            .bound_textures
            .get(&(unit, target))
            .and_then(|texture| self.textures.get(texture))
        else {
            return INCOMPLETE;
        };
        if texture.width == 0 || texture.height == 0 {
            return INCOMPLETE;
        }
        let x = ((u * texture.width as f32) as i64).clamp(0, texture.width as i64 - 1) as usize;
        let y = ((v * texture.height as f32) as i64).clamp(0, texture.height as i64 - 1) as usize;
        let at = (y * texture.width as usize + x) * 4;
        let mut texel = [0; 4];
        texel.copy_from_slice(&texture.pixels[at..at + 4]);
        texel
    }

    fn rasterize(&mut self, mode: Primitive, first: i32, count: i32) {
        let Some(program) = self.current_program.and_then(|id| self.programs.get(&id)) else {
            return;
        };
        let mut vertices = Vec::with_capacity(count.max(0) as usize);
        for vertex in first..first + count {
            let Some(position) = self.fetch_attribute(0, vertex) else {
                return;
            };
            let texcoord = self.fetch_attribute(1, vertex).unwrap_or([0.0; 4]);
            let w = if position[3] == 0.0 { 1.0 } else { position[3] };
            let [vx, vy, vw, vh] = self.viewport;
            let x = vx as f32 + (position[0] / w + 1.0) * 0.5 * vw as f32;
            let y = vy as f32 + (position[1] / w + 1.0) * 0.5 * vh as f32;
            vertices.push(([x, y], [texcoord[0], texcoord[1]]));
        }

        let triangles: Vec<[usize; 3]> = match mode {
            Primitive::Triangles => (0..vertices.len() / 3)
                .map(|i| [i * 3, i * 3 + 1, i * 3 + 2])
                .collect(),
            Primitive::TriangleStrip => (2..vertices.len()).map(|i| [i - 2, i - 1, i]).collect(),
            Primitive::TriangleFan => (2..vertices.len()).map(|i| [0, i - 1, i]).collect(),
        };

        let mut writes = Vec::new();
        for [a, b, c] in triangles {
            let (pa, ta) = vertices[a];
            let (pb, tb) = vertices[b];
            let (pc, tc) = vertices[c];
            let area = edge(pa, pb, pc);
            if area == 0.0 {
                continue;
            }
            let [vx, vy, vw, vh] = self.viewport;
            let min_x = pa[0].min(pb[0]).min(pc[0]).floor().max(vx.max(0) as f32) as i64;
            let max_x = pa[0].max(pb[0]).max(pc[0]).ceil().min((vx + vw).min(self.width as i32) as f32) as i64;
            let min_y = pa[1].min(pb[1]).min(pc[1]).floor().max(vy.max(0) as f32) as i64;
            let max_y = pa[1].max(pb[1]).max(pc[1]).ceil().min((vy + vh).min(self.height as i32) as f32) as i64;
            for py in min_y..max_y {
                for px in min_x..max_x {
                    let p = [px as f32 + 0.5, py as f32 + 0.5];
                    let wa = edge(pb, pc, p) / area;
                    let wb = edge(pc, pa, p) / area;
                    let wc = edge(pa, pb, p) / area;
                    if wa < 0.0 || wb < 0.0 || wc < 0.0 {
                        continue;
                    }
                    let u = wa * ta[0] + wb * tb[0] + wc * tc[0];
                    let v = wa * ta[1] + wb * tb[1] + wc * tc[1];
                    writes.push((px as usize, py as usize, self.sample(program, u, v)));
                }
            }
        }

        let width = self.width as usize;
        for (x, y, texel) in writes {
            let at = (y * width + x) * 4;
            self.framebuffer[at..at + 4].copy_from_slice(&texel);
        }
    }
}

struct ProgramRecordUpdate {
    attributes: Vec<String>,
    uniforms: Vec<String>,
    sampler: Option<(TextureTarget, u32)>,
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// `(type, name)` pairs declared with `qualifier` at the start of a line, in
/// order. Precision qualifiers between the two are skipped.
fn declarations(source: &str, qualifier: &str) -> Vec<(String, String)> {
    source
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix(qualifier)?;
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            let tokens: Vec<&str> = rest.trim_end().trim_end_matches(';').split_whitespace().collect();
            let (name, head) = tokens.split_last()?;
            let ty = head.last()?;
            Some((ty.to_string(), name.to_string()))
        })
        .collect()
}

fn validate_glsl(source: &str) -> Result<(), String> {
    let mut braces = 0i32;
    let mut parens = 0i32;
    let mut last_line = 0;
    for (index, line) in source.lines().enumerate() {
        last_line = index + 1;
        let code = line.split("//").next().unwrap_or_default();
        for ch in code.chars() {
            match ch {
                '{' => braces += 1,
                '}' => braces -= 1,
                '(' => parens += 1,
                ')' => parens -= 1,
                _ => {}
            }
            if braces < 0 || parens < 0 {
                return Err(format!("ERROR: 0:{last_line}: syntax error: unexpected '{ch}'"));
            }
        }
    }
    if braces != 0 || parens != 0 {
        return Err(format!(
            "ERROR: 0:{last_line}: syntax error: unexpected end of file"
        ));
    }
    if !source.contains("void main") {
        return Err("ERROR: 0:0: missing function definition for 'main'".into());
    }
    if source.contains("samplerExternalOES") && !source.contains("GL_OES_EGL_image_external") {
        return Err(
            "ERROR: 0:0: 'samplerExternalOES' requires extension GL_OES_EGL_image_external"
                .into(),
        );
    }
    Ok(())
}

fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl Gles for RecordingGles {
    fn create_shader(&mut self, kind: ShaderKind) -> Option<ShaderId> {
        let shader = ShaderId::from_raw(self.allocate_name());
        if let Some(shader) = shader {
            self.shaders.insert(
                shader,
                ShaderRecord {
                    kind,
                    source: String::new(),
                    compiled: false,
                    log: String::new(),
                },
            );
        }
        self.calls.push(GlCall::CreateShader { kind, shader });
        shader
    }

    fn shader_source(&mut self, shader: ShaderId, source: &str) {
        self.calls.push(GlCall::ShaderSource { shader });
        match self.shaders.get_mut(&shader) {
            Some(record) => record.source = source.to_string(),
            None => self.raise(INVALID_VALUE),
        }
    }

    fn compile_shader(&mut self, shader: ShaderId) {
        self.calls.push(GlCall::CompileShader { shader });
        match self.shaders.get_mut(&shader) {
            Some(record) => match validate_glsl(&record.source) {
                Ok(()) => {
                    record.compiled = true;
                    record.log.clear();
                }
                Err(log) => {
                    record.compiled = false;
                    record.log = log;
                }
            },
            None => self.raise(INVALID_VALUE),
        }
    }

    fn shader_compile_status(&mut self, shader: ShaderId) -> bool {
        self.shaders
            .get(&shader)
            .map(|record| record.compiled)
            .unwrap_or(false)
    }

    fn shader_info_log(&mut self, shader: ShaderId) -> String {
        self.shaders
            .get(&shader)
            .map(|record| record.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.calls.push(GlCall::DeleteShader { shader });
        if self.shaders.remove(&shader).is_none() {
            self.raise(INVALID_VALUE);
        }
    }

    fn create_program(&mut self) -> Option<ProgramId> {
        let program = ProgramId::from_raw(self.allocate_name());
        if let Some(program) = program {
            self.programs.insert(program, ProgramRecord::default());
        }
        self.calls.push(GlCall::CreateProgram { program });
        program
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        self.calls.push(GlCall::AttachShader { program, shader });
        if !self.shaders.contains_key(&shader) {
            self.raise(INVALID_VALUE);
            return;
        }
        match self.programs.get_mut(&program) {
            Some(record) if record.shaders.contains(&shader) => self.raise(INVALID_OPERATION),
            Some(record) => record.shaders.push(shader),
            None => self.raise(INVALID_VALUE),
        }
    }

    fn link_program(&mut self, program: ProgramId) {
        self.calls.push(GlCall::LinkProgram { program });
        if !self.programs.contains_key(&program) {
            self.raise(INVALID_VALUE);
            return;
        }
        let outcome = self.link(program);
        if let Some(record) = self.programs.get_mut(&program) {
            match outcome {
                Ok(update) => {
                    record.linked = true;
                    record.log.clear();
                    record.attributes = update.attributes;
                    record.uniforms = update.uniforms;
                    record.sampler = update.sampler;
                    record.uniform_values.clear();
                }
                Err(log) => {
                    record.linked = false;
                    record.log = log;
                }
            }
        }
    }

    fn program_link_status(&mut self, program: ProgramId) -> bool {
        self.programs
            .get(&program)
            .map(|record| record.linked)
            .unwrap_or(false)
    }

    fn program_info_log(&mut self, program: ProgramId) -> String {
        self.programs
            .get(&program)
            .map(|record| record.log.clone())
            .unwrap_or_default()
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.calls.push(GlCall::DeleteProgram { program });
        if self.programs.remove(&program).is_none() {
            self.raise(INVALID_VALUE);
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.calls.push(GlCall::UseProgram { program });
        match program {
            None => self.current_program = None,
            Some(id) => match self.programs.get(&id) {
                Some(record) if record.linked => self.current_program = Some(id),
                Some(_) => self.raise(INVALID_OPERATION),
                None => self.raise(INVALID_VALUE),
            },
        }
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let location = match self.programs.get(&program) {
            Some(record) if record.linked => record
                .attributes
                .iter()
                .position(|attribute| attribute == name)
                .map(|index| index as u32),
            Some(_) => {
                self.raise(INVALID_OPERATION);
                None
            }
            None => {
                self.raise(INVALID_VALUE);
                None
            }
        };
        self.calls.push(GlCall::GetAttribLocation {
            program,
            name: name.to_string(),
            location,
        });
        location
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let location = match self.programs.get(&program) {
            Some(record) if record.linked => record
                .uniforms
                .iter()
                .position(|uniform| uniform == name)
                .map(|index| UniformLocation(index as u32)),
            Some(_) => {
                self.raise(INVALID_OPERATION);
                None
            }
            None => {
                self.raise(INVALID_VALUE);
                None
            }
        };
        self.calls.push(GlCall::GetUniformLocation {
            program,
            name: name.to_string(),
            location,
        });
        location
    }

    fn uniform_1_i32(&mut self, location: UniformLocation, value: i32) {
        self.calls.push(GlCall::Uniform1i { location, value });
        let Some(record) = self
            .current_program
            .and_then(|program| self.programs.get_mut(&program))
        else {
            self.raise(INVALID_OPERATION);
            return;
        };
        if (location.0 as usize) < record.uniforms.len() {
            record.uniform_values.insert(location.0, value);
        } else {
            self.raise(INVALID_OPERATION);
        }
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        self.calls.push(GlCall::EnableVertexAttribArray { index });
        if index >= MAX_VERTEX_ATTRIBS {
            self.raise(INVALID_VALUE);
        } else {
            self.enabled_attribs.insert(index);
        }
    }

    fn create_buffer(&mut self) -> Option<BufferId> {
        let buffer = BufferId::from_raw(self.allocate_name());
        if let Some(buffer) = buffer {
            self.buffers.insert(buffer, Vec::new());
        }
        self.calls.push(GlCall::CreateBuffer { buffer });
        buffer
    }

    fn bind_array_buffer(&mut self, buffer: Option<BufferId>) {
        self.calls.push(GlCall::BindArrayBuffer { buffer });
        match buffer {
            Some(id) if !self.buffers.contains_key(&id) => self.raise(INVALID_OPERATION),
            _ => self.array_buffer = buffer,
        }
    }

    fn array_buffer_data(&mut self, data: &[u8]) {
        self.calls.push(GlCall::ArrayBufferData { len: data.len() });
        match self
            .array_buffer
            .and_then(|buffer| self.buffers.get_mut(&buffer))
        {
            Some(storage) => *storage = data.to_vec(),
            None => self.raise(INVALID_OPERATION),
        }
    }

    fn vertex_attrib_pointer_f32(&mut self, index: u32, size: i32, stride: i32, offset: i32) {
        self.calls.push(GlCall::VertexAttribPointer {
            index,
            size,
            stride,
            offset,
        });
        if index >= MAX_VERTEX_ATTRIBS || !(1..=4).contains(&size) || stride < 0 || offset < 0 {
            self.raise(INVALID_VALUE);
            return;
        }
        match self.array_buffer {
            Some(buffer) => {
                self.attrib_pointers.insert(
                    index,
                    AttribPointer {
                        buffer,
                        size,
                        stride,
                        offset,
                    },
                );
            }
            None => self.raise(INVALID_OPERATION),
        }
    }

    fn create_texture(&mut self) -> Option<TextureId> {
        let texture = TextureId::from_raw(self.allocate_name());
        if let Some(texture) = texture {
            self.textures.insert(texture, TextureRecord::default());
        }
        self.calls.push(GlCall::CreateTexture { texture });
        texture
    }

    fn active_texture(&mut self, unit: u32) {
        self.calls.push(GlCall::ActiveTexture { unit });
        match unit.checked_sub(TEXTURE0) {
            Some(index) if index < MAX_TEXTURE_UNITS => self.active_unit = index,
            _ => self.raise(INVALID_ENUM),
        }
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        self.calls.push(GlCall::BindTexture { target, texture });
        let key = (self.active_unit, target);
        let Some(id) = texture else {
            self.bound_textures.remove(&key);
            return;
        };
        match self.textures.get_mut(&id) {
            Some(record) => match record.target {
                Some(existing) if existing != target => self.raise(INVALID_OPERATION),
                _ => {
                    record.target = Some(target);
                    self.bound_textures.insert(key, id);
                }
            },
            None => self.raise(INVALID_OPERATION),
        }
    }

    fn tex_parameter_i32(&mut self, target: TextureTarget, parameter: u32, value: i32) {
        self.calls.push(GlCall::TexParameter {
            target,
            parameter,
            value,
        });
        match self
            .bound_texture(target)
            .and_then(|texture| self.textures.get_mut(&texture))
        {
            Some(record) => {
                record.parameters.insert(parameter, value);
            }
            None => self.raise(INVALID_OPERATION),
        }
    }

    fn tex_image_2d_rgba(&mut self, target: TextureTarget, width: u32, height: u32, pixels: &[u8]) {
        self.calls.push(GlCall::TexImage2d {
            target,
            width,
            height,
        });
        let expected = width as usize * height as usize * 4;
        if pixels.len() < expected {
            self.raise(INVALID_VALUE);
            return;
        }
        match self
            .bound_texture(target)
            .and_then(|texture| self.textures.get_mut(&texture))
        {
            Some(record) => {
                record.width = width;
                record.height = height;
                record.pixels = pixels[..expected].to_vec();
            }
            None => self.raise(INVALID_OPERATION),
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.calls.push(GlCall::Viewport {
            x,
            y,
            width,
            height,
        });
        if width < 0 || height < 0 {
            self.raise(INVALID_VALUE);
        } else {
            self.viewport = [x, y, width, height];
        }
    }

    fn clear_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.clear_color = [red, green, blue, alpha];
        self.calls.push(GlCall::ClearColor(self.clear_color));
    }

    fn clear(&mut self, mask: u32) {
        self.calls.push(GlCall::Clear { mask });
        if mask & COLOR_BUFFER_BIT != 0 {
            let color = self.clear_color.map(to_unorm8);
            for pixel in self.framebuffer.chunks_exact_mut(4) {
                pixel.copy_from_slice(&color);
            }
        }
    }

    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32) {
        self.calls
            .push(GlCall::DrawArrays(DrawCall { mode, first, count }));
        if first < 0 || count < 0 {
            self.raise(INVALID_VALUE);
            return;
        }
        if self.current_program.is_none() {
            self.raise(INVALID_OPERATION);
            return;
        }
        self.rasterize(mode, first, count);
    }

    fn finish(&mut self) {
        self.calls.push(GlCall::Finish);
    }

    fn get_error(&mut self) -> u32 {
        self.errors.pop_front().unwrap_or(NO_ERROR)
    }

    fn read_pixels_rgba(&mut self, x: i32, y: i32, width: u32, height: u32) -> Vec<u8> {
        self.calls.push(GlCall::ReadPixels {
            x,
            y,
            width,
            height,
        });
        let mut out = vec![0; width as usize * height as usize * 4];
        for row in 0..height as i64 {
            let source_y = y as i64 + row;
            if source_y < 0 || source_y >= self.height as i64 {
                continue;
            }
            for column in 0..width as i64 {
                let source_x = x as i64 + column;
                if source_x < 0 || source_x >= self.width as i64 {
                    continue;
                }
                let from = ((source_y as usize) * self.width as usize + source_x as usize) * 4;
                let to = ((row as usize) * width as usize + column as usize) * 4;
                out[to..to + 4].copy_from_slice(&self.framebuffer[from..from + 4]);
            }
        }
        out
    }
}
