use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use gru_glue_core::value::format_number;
use gru_glue_core::HostValue;

// ============================================================
// Enums
// ============================================================

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;

pub const FRAGMENT_SHADER: u32 = 0x8B30;
pub const VERTEX_SHADER: u32 = 0x8B31;

pub const DELETE_STATUS: u32 = 0x8B80;
pub const COMPILE_STATUS: u32 = 0x8B81;
pub const LINK_STATUS: u32 = 0x8B82;
pub const SHADER_TYPE: u32 = 0x8B4F;
pub const ATTACHED_SHADERS: u32 = 0x8B85;
pub const ACTIVE_UNIFORMS: u32 = 0x8B86;
pub const ACTIVE_ATTRIBUTES: u32 = 0x8B89;

pub const ARRAY_BUFFER: u32 = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: u32 = 0x8893;
pub const STREAM_DRAW: u32 = 0x88E0;
pub const STATIC_DRAW: u32 = 0x88E4;
pub const DYNAMIC_DRAW: u32 = 0x88E8;

pub const TEXTURE_2D: u32 = 0x0DE1;
pub const TEXTURE_CUBE_MAP: u32 = 0x8513;
pub const TEXTURE0: u32 = 0x84C0;
pub const UNPACK_ALIGNMENT: u32 = 0x0CF5;

pub const ALPHA: u32 = 0x1906;
pub const RGB: u32 = 0x1907;
pub const RGBA: u32 = 0x1908;
pub const LUMINANCE: u32 = 0x1909;
pub const LUMINANCE_ALPHA: u32 = 0x190A;
pub const UNSIGNED_BYTE: u32 = 0x1401;

pub const VENDOR: u32 = 0x1F00;
pub const RENDERER: u32 = 0x1F01;
pub const VERSION: u32 = 0x1F02;
pub const SHADING_LANGUAGE_VERSION: u32 = 0x8B8C;
pub const MAX_TEXTURE_SIZE: u32 = 0x0D33;
pub const VIEWPORT: u32 = 0x0BA2;
pub const MAX_VERTEX_ATTRIBS: u32 = 0x8869;
pub const MAX_TEXTURE_IMAGE_UNITS: u32 = 0x8872;

const VERTEX_ATTRIBS: u32 = 16;
const TEXTURE_UNITS: u32 = 16;
const TEXTURE_SIZE: u32 = 4096;
const COMMAND_LOG: usize = 4096;

const WEBGL1_EXTENSIONS: &[&str] = &[
    "ANGLE_instanced_arrays",
    "EXT_blend_minmax",
    "OES_element_index_uint",
    "OES_standard_derivatives",
    "OES_texture_float",
    "OES_vertex_array_object",
    "WEBGL_depth_texture",
    "WEBGL_lose_context",
];

const WEBGL2_EXTENSIONS: &[&str] = &[
    "EXT_color_buffer_float",
    "EXT_texture_filter_anisotropic",
    "OES_texture_float_linear",
    "WEBGL_lose_context",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GlVersion {
    WebGl1,
    WebGl2,
}

impl GlVersion {
    pub fn number(self) -> u8 {
        match self {
            GlVersion::WebGl1 => 1,
            GlVersion::WebGl2 => 2,
        }
    }
}

// ============================================================
// Objects
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveInfo {
    pub name: String,
    pub size: i32,
    pub ty: u32,
}

#[derive(Debug)]
pub struct GlShader {
    pub id: u32,
    pub kind: u32,
    source: RefCell<String>,
    compiled: Cell<bool>,
    deleted: Cell<bool>,
    info_log: RefCell<String>,
}

impl GlShader {
    pub fn source(&self) -> String {
        self.source.borrow().clone()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Mat4(glam::Mat4),
}

#[derive(Debug)]
pub struct GlProgram {
    pub id: u32,
    shaders: RefCell<Vec<Rc<GlShader>>>,
    linked: Cell<bool>,
    deleted: Cell<bool>,
    info_log: RefCell<String>,
    attributes: RefCell<Vec<ActiveInfo>>,
    uniforms: RefCell<Vec<ActiveInfo>>,
    bound_attribs: RefCell<BTreeMap<String, u32>>,
    uniform_values: RefCell<BTreeMap<String, UniformValue>>,
}

impl GlProgram {
    pub fn is_linked(&self) -> bool {
        self.linked.get()
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniform_values.borrow().get(name).copied()
    }

    pub fn attrib_binding(&self, name: &str) -> Option<u32> {
        self.bound_attribs.borrow().get(name).copied()
    }

    fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.borrow().iter().any(|u| u.name == name)
    }
}

#[derive(Debug)]
pub struct GlBuffer {
    pub id: u32,
    data: RefCell<Vec<u8>>,
    deleted: Cell<bool>,
}

impl GlBuffer {
    pub fn data(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn size(&self) -> usize {
        self.data.borrow().len()
    }
}

#[derive(Debug)]
pub struct GlTexture {
    pub id: u32,
    levels: RefCell<BTreeMap<i32, (u32, u32)>>,
    params: RefCell<BTreeMap<u32, i32>>,
    mipmapped: Cell<bool>,
    deleted: Cell<bool>,
}

impl GlTexture {
    /// Size of mip level `level`, once an image was specified for it.
    pub fn level_size(&self, level: i32) -> Option<(u32, u32)> {
        self.levels.borrow().get(&level).copied()
    }

    pub fn parameter(&self, pname: u32) -> Option<i32> {
        self.params.borrow().get(&pname).copied()
    }

    pub fn is_mipmapped(&self) -> bool {
        self.mipmapped.get()
    }
}

/// Result of `getUniformLocation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLocation {
    pub program: u32,
    pub name: String,
}

#[derive(Debug)]
pub struct GlExtension {
    pub name: &'static str,
}

/// One recorded context call.
#[derive(Debug, Clone, PartialEq)]
pub struct GlCommand {
    pub name: &'static str,
    pub args: Vec<f64>,
}

impl fmt::Display for GlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| format_number(*a)).collect();
        write!(f, "{}({})", self.name, args.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VertexAttrib {
    pub enabled: bool,
    pub size: i32,
    pub ty: u32,
    pub normalized: bool,
    pub stride: i32,
    pub offset: i32,
}

/// Depth, blend and cull settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterState {
    pub depth_func: u32,
    pub blend_equation: u32,
    pub blend_func: (u32, u32),
    pub cull_face: u32,
}

struct GlState {
    program: Option<Rc<GlProgram>>,
    array_buffer: Option<Rc<GlBuffer>>,
    element_buffer: Option<Rc<GlBuffer>>,
    active_texture: u32,
    textures: BTreeMap<(u32, u32), Rc<GlTexture>>,
    enabled: BTreeSet<u32>,
    clear_color: [f32; 4],
    viewport: [i32; 4],
    raster: RasterState,
    unpack_alignment: i32,
    attribs: BTreeMap<u32, VertexAttrib>,
}

// ============================================================
// Context
// ============================================================

/// A headless WebGL context.
///
/// Keeps the object model and bound state the guest can observe back
/// (parameters, info logs, reflection, errors) and logs every call; nothing
/// is rasterized.
pub struct GlContext {
    pub version: GlVersion,
    state: RefCell<GlState>,
    commands: RefCell<VecDeque<GlCommand>>,
    total_commands: Cell<u64>,
    draw_calls: Cell<u64>,
    error: Cell<u32>,
    next_id: Cell<u32>,
}

impl fmt::Debug for GlContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlContext")
            .field("version", &self.version)
            .field("commands", &self.total_commands.get())
            .field("draw_calls", &self.draw_calls.get())
            .finish()
    }
}

impl GlContext {
    pub fn new(version: GlVersion, width: u32, height: u32) -> Self {
        Self {
            version,
            state: RefCell::new(GlState {
                program: None,
                array_buffer: None,
                element_buffer: None,
                active_texture: TEXTURE0,
                textures: BTreeMap::new(),
                enabled: BTreeSet::new(),
                clear_color: [0.0; 4],
                viewport: [0, 0, width as i32, height as i32],
                raster: RasterState {
                    depth_func: 0x0201,     // LESS
                    blend_equation: 0x8006, // FUNC_ADD
                    blend_func: (1, 0),
                    cull_face: 0x0405, // BACK
                },
                unpack_alignment: 4,
                attribs: BTreeMap::new(),
            }),
            commands: RefCell::new(VecDeque::new()),
            total_commands: Cell::new(0),
            draw_calls: Cell::new(0),
            error: Cell::new(NO_ERROR),
            next_id: Cell::new(1),
        }
    }

    /// Most recent calls, oldest first.
    pub fn commands(&self) -> Vec<GlCommand> {
        self.commands.borrow().iter().cloned().collect()
    }

    pub fn total_commands(&self) -> u64 {
        self.total_commands.get()
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls.get()
    }

    /// `getError`: returns and clears the recorded error.
    pub fn take_error(&self) -> u32 {
        self.error.replace(NO_ERROR)
    }

    pub fn peek_error(&self) -> u32 {
        self.error.get()
    }

    pub fn is_enabled(&self, cap: u32) -> bool {
        self.state.borrow().enabled.contains(&cap)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.state.borrow().clear_color
    }

    pub fn viewport(&self) -> [i32; 4] {
        self.state.borrow().viewport
    }

    pub fn raster_state(&self) -> RasterState {
        self.state.borrow().raster
    }

    pub fn current_program(&self) -> Option<Rc<GlProgram>> {
        self.state.borrow().program.clone()
    }

    pub fn vertex_attrib(&self, index: u32) -> VertexAttrib {
        self.state
            .borrow()
            .attribs
            .get(&index)
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, name: &'static str, args: &[f64]) {
        let mut log = self.commands.borrow_mut();
        if log.len() == COMMAND_LOG {
            log.pop_front();
        }
        log.push_back(GlCommand {
            name,
            args: args.to_vec(),
        });
        self.total_commands.set(self.total_commands.get() + 1);
    }

    /// Record `code` unless an earlier error is still pending.
    fn fail(&self, call: &str, code: u32) {
        log::debug!("{call}: GL error {code:#06x}");
        if self.error.get() == NO_ERROR {
            self.error.set(code);
        }
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    // ------------------------------------------------------------
    // Shaders and programs
    // ------------------------------------------------------------

    pub fn create_shader(&self, kind: u32) -> Option<Rc<GlShader>> {
        self.record("createShader", &[kind as f64]);
        if kind != VERTEX_SHADER && kind != FRAGMENT_SHADER {
            self.fail("createShader", INVALID_ENUM);
            return None;
        }
        Some(Rc::new(GlShader {
            id: self.next_id(),
            kind,
            source: RefCell::default(),
            compiled: Cell::new(false),
            deleted: Cell::new(false),
            info_log: RefCell::default(),
        }))
    }

    pub fn shader_source(&self, shader: &GlShader, source: &str) {
        self.record("shaderSource", &[shader.id as f64]);
        *shader.source.borrow_mut() = source.to_string();
    }

    /// Accepts any non-empty source that defines `main`.
    pub fn compile_shader(&self, shader: &GlShader) {
        self.record("compileShader", &[shader.id as f64]);
        let source = shader.source.borrow();
        let (ok, log) = if source.trim().is_empty() {
            (false, "ERROR: 0:0: empty shader source")
        } else if !strip_comments(&source).contains("main") {
            (false, "ERROR: 0:1: 'main' : function not defined")
        } else {
            (true, "")
        };
        shader.compiled.set(ok);
        *shader.info_log.borrow_mut() = log.to_string();
    }

    pub fn shader_parameter(&self, shader: &GlShader, pname: u32) -> HostValue {
        self.record("getShaderParameter", &[shader.id as f64, pname as f64]);
        match pname {
            COMPILE_STATUS => HostValue::from(shader.compiled.get()),
            DELETE_STATUS => HostValue::from(shader.deleted.get()),
            SHADER_TYPE => HostValue::from(shader.kind as f64),
            _ => {
                self.fail("getShaderParameter", INVALID_ENUM);
                HostValue::Null
            }
        }
    }

    pub fn shader_info_log(&self, shader: &GlShader) -> String {
        shader.info_log.borrow().clone()
    }

    pub fn delete_shader(&self, shader: Option<&GlShader>) {
        let Some(shader) = shader else { return };
        self.record("deleteShader", &[shader.id as f64]);
        shader.deleted.set(true);
    }

    pub fn create_program(&self) -> Rc<GlProgram> {
        let id = self.next_id();
        self.record("createProgram", &[]);
        Rc::new(GlProgram {
            id,
            shaders: RefCell::default(),
            linked: Cell::new(false),
            deleted: Cell::new(false),
            info_log: RefCell::default(),
            attributes: RefCell::default(),
            uniforms: RefCell::default(),
            bound_attribs: RefCell::default(),
            uniform_values: RefCell::default(),
        })
    }

    pub fn attach_shader(&self, program: &GlProgram, shader: Rc<GlShader>) {
        self.record("attachShader", &[program.id as f64, shader.id as f64]);
        let mut shaders = program.shaders.borrow_mut();
        if shaders.iter().any(|s| s.kind == shader.kind) {
            self.fail("attachShader", INVALID_OPERATION);
            return;
        }
        shaders.push(shader);
    }

    pub fn detach_shader(&self, program: &GlProgram, shader: &GlShader) {
        self.record("detachShader", &[program.id as f64, shader.id as f64]);
        let mut shaders = program.shaders.borrow_mut();
        let before = shaders.len();
        shaders.retain(|s| s.id != shader.id);
        if shaders.len() == before {
            self.fail("detachShader", INVALID_OPERATION);
        }
    }

    /// Link from the attached shaders and rebuild the active attribute and
    /// uniform lists from their declarations.
    pub fn link_program(&self, program: &GlProgram) {
        self.record("linkProgram", &[program.id as f64]);
        let shaders = program.shaders.borrow();
        let stage = |kind: u32| {
            shaders
                .iter()
                .find(|s| s.kind == kind && s.compiled.get())
                .cloned()
        };
        let (Some(vertex), Some(fragment)) = (stage(VERTEX_SHADER), stage(FRAGMENT_SHADER)) else {
            program.linked.set(false);
            *program.info_log.borrow_mut() =
                "error: a compiled vertex and fragment shader must be attached".to_string();
            return;
        };

        let vs = parse_declarations(&vertex.source.borrow(), true);
        let fs = parse_declarations(&fragment.source.borrow(), false);
        let mut uniforms = vs.uniforms;
        for u in fs.uniforms {
            if !uniforms.iter().any(|existing| existing.name == u.name) {
                uniforms.push(u);
            }
        }
        *program.attributes.borrow_mut() = vs.attributes;
        *program.uniforms.borrow_mut() = uniforms;
        program.uniform_values.borrow_mut().clear();
        program.info_log.borrow_mut().clear();
        program.linked.set(true);
    }

    pub fn program_parameter(&self, program: &GlProgram, pname: u32) -> HostValue {
        self.record("getProgramParameter", &[program.id as f64, pname as f64]);
        match pname {
            LINK_STATUS => HostValue::from(program.linked.get()),
            DELETE_STATUS => HostValue::from(program.deleted.get()),
            ATTACHED_SHADERS => HostValue::from(program.shaders.borrow().len() as f64),
            ACTIVE_ATTRIBUTES => HostValue::from(program.attributes.borrow().len() as f64),
            ACTIVE_UNIFORMS => HostValue::from(program.uniforms.borrow().len() as f64),
            _ => {
                self.fail("getProgramParameter", INVALID_ENUM);
                HostValue::Null
            }
        }
    }

    pub fn program_info_log(&self, program: &GlProgram) -> String {
        program.info_log.borrow().clone()
    }

    pub fn delete_program(&self, program: Option<&GlProgram>) {
        let Some(program) = program else { return };
        self.record("deleteProgram", &[program.id as f64]);
        program.deleted.set(true);
    }

    pub fn active_attrib(&self, program: &GlProgram, index: u32) -> Option<ActiveInfo> {
        self.record("getActiveAttrib", &[program.id as f64, index as f64]);
        let info = program.attributes.borrow().get(index as usize).cloned();
        if info.is_none() {
            self.fail("getActiveAttrib", INVALID_VALUE);
        }
        info
    }

    pub fn active_uniform(&self, program: &GlProgram, index: u32) -> Option<ActiveInfo> {
        self.record("getActiveUniform", &[program.id as f64, index as f64]);
        let info = program.uniforms.borrow().get(index as usize).cloned();
        if info.is_none() {
            self.fail("getActiveUniform", INVALID_VALUE);
        }
        info
    }

    pub fn uniform_location(&self, program: &GlProgram, name: &str) -> Option<UniformLocation> {
        self.record("getUniformLocation", &[program.id as f64]);
        if !program.linked.get() {
            self.fail("getUniformLocation", INVALID_OPERATION);
            return None;
        }
        let uniforms = program.uniforms.borrow();
        let found = uniforms
            .iter()
            .find(|u| u.name == name || u.name.strip_suffix("[0]") == Some(name))?;
        Some(UniformLocation {
            program: program.id,
            name: found.name.clone(),
        })
    }

    pub fn bind_attrib_location(&self, program: &GlProgram, index: u32, name: &str) {
        self.record("bindAttribLocation", &[program.id as f64, index as f64]);
        if index >= VERTEX_ATTRIBS {
            self.fail("bindAttribLocation", INVALID_VALUE);
            return;
        }
        if name.starts_with("gl_") {
            self.fail("bindAttribLocation", INVALID_OPERATION);
            return;
        }
        program
            .bound_attribs
            .borrow_mut()
            .insert(name.to_string(), index);
    }

    pub fn use_program(&self, program: Option<Rc<GlProgram>>) {
        self.record(
            "useProgram",
            &[program.as_ref().map_or(0.0, |p| p.id as f64)],
        );
        if let Some(p) = &program {
            if !p.linked.get() {
                self.fail("useProgram", INVALID_OPERATION);
                return;
            }
        }
        self.state.borrow_mut().program = program;
    }

    /// The current program, if `location` belongs to it.
    fn uniform_target(&self, call: &str, location: &UniformLocation) -> Option<Rc<GlProgram>> {
        let program = self.state.borrow().program.clone();
        match program {
            Some(p) if p.id == location.program && p.has_uniform(&location.name) => Some(p),
            _ => {
                self.fail(call, INVALID_OPERATION);
                None
            }
        }
    }

    pub fn uniform_matrix4fv(&self, location: Option<&UniformLocation>, transpose: bool, data: &[f32]) {
        self.record("uniformMatrix4fv", &[transpose as u8 as f64, data.len() as f64]);
        let Some(location) = location else { return };
        if transpose && self.version == GlVersion::WebGl1 {
            self.fail("uniformMatrix4fv", INVALID_VALUE);
            return;
        }
        if data.len() < 16 || data.len() % 16 != 0 {
            self.fail("uniformMatrix4fv", INVALID_VALUE);
            return;
        }
        let Some(program) = self.uniform_target("uniformMatrix4fv", location) else {
            return;
        };
        let mut matrix = glam::Mat4::from_cols_slice(&data[..16]);
        if transpose {
            matrix = matrix.transpose();
        }
        program
            .uniform_values
            .borrow_mut()
            .insert(location.name.clone(), UniformValue::Mat4(matrix));
    }

    pub fn uniform1i(&self, location: Option<&UniformLocation>, value: i32) {
        self.record("uniform1i", &[value as f64]);
        let Some(location) = location else { return };
        let Some(program) = self.uniform_target("uniform1i", location) else {
            return;
        };
        program
            .uniform_values
            .borrow_mut()
            .insert(location.name.clone(), UniformValue::Int(value));
    }

    // ------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------

    pub fn create_buffer(&self) -> Rc<GlBuffer> {
        let id = self.next_id();
        self.record("createBuffer", &[]);
        Rc::new(GlBuffer {
            id,
            data: RefCell::default(),
            deleted: Cell::new(false),
        })
    }

    pub fn bind_buffer(&self, target: u32, buffer: Option<Rc<GlBuffer>>) {
        self.record(
            "bindBuffer",
            &[target as f64, buffer.as_ref().map_or(0.0, |b| b.id as f64)],
        );
        if buffer.as_ref().is_some_and(|b| b.deleted.get()) {
            self.fail("bindBuffer", INVALID_OPERATION);
            return;
        }
        let mut state = self.state.borrow_mut();
        match target {
            ARRAY_BUFFER => state.array_buffer = buffer,
            ELEMENT_ARRAY_BUFFER => state.element_buffer = buffer,
            _ => {
                drop(state);
                self.fail("bindBuffer", INVALID_ENUM);
            }
        }
    }

    fn bound_buffer(&self, call: &str, target: u32) -> Option<Rc<GlBuffer>> {
        let bound = {
            let state = self.state.borrow();
            match target {
                ARRAY_BUFFER => Ok(state.array_buffer.clone()),
                ELEMENT_ARRAY_BUFFER => Ok(state.element_buffer.clone()),
                _ => Err(()),
            }
        };
        match bound {
            Ok(Some(buffer)) => Some(buffer),
            Ok(None) => {
                self.fail(call, INVALID_OPERATION);
                None
            }
            Err(()) => {
                self.fail(call, INVALID_ENUM);
                None
            }
        }
    }

    /// `bufferData(target, size, usage)`: allocate zeroed storage.
    pub fn buffer_data(&self, target: u32, size: i32, usage: u32) {
        self.record("bufferData", &[target as f64, size as f64, usage as f64]);
        if !matches!(usage, STREAM_DRAW | STATIC_DRAW | DYNAMIC_DRAW) {
            self.fail("bufferData", INVALID_ENUM);
            return;
        }
        if size < 0 {
            self.fail("bufferData", INVALID_VALUE);
            return;
        }
        if let Some(buffer) = self.bound_buffer("bufferData", target) {
            *buffer.data.borrow_mut() = vec![0; size as usize];
        }
    }

    pub fn buffer_sub_data(&self, target: u32, offset: i32, bytes: &[u8]) {
        self.record(
            "bufferSubData",
            &[target as f64, offset as f64, bytes.len() as f64],
        );
        let Some(buffer) = self.bound_buffer("bufferSubData", target) else {
            return;
        };
        let mut data = buffer.data.borrow_mut();
        if offset < 0 || offset as usize + bytes.len() > data.len() {
            drop(data);
            self.fail("bufferSubData", INVALID_VALUE);
            return;
        }
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn delete_buffer(&self, buffer: Option<&GlBuffer>) {
        let Some(buffer) = buffer else { return };
        self.record("deleteBuffer", &[buffer.id as f64]);
        buffer.deleted.set(true);
        let mut state = self.state.borrow_mut();
        if state.array_buffer.as_ref().is_some_and(|b| b.id == buffer.id) {
            state.array_buffer = None;
        }
        if state.element_buffer.as_ref().is_some_and(|b| b.id == buffer.id) {
            state.element_buffer = None;
        }
    }

    // ------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------

    pub fn create_texture(&self) -> Rc<GlTexture> {
        let id = self.next_id();
        self.record("createTexture", &[]);
        Rc::new(GlTexture {
            id,
            levels: RefCell::default(),
            params: RefCell::default(),
            mipmapped: Cell::new(false),
            deleted: Cell::new(false),
        })
    }

    pub fn active_texture(&self, unit: u32) {
        self.record("activeTexture", &[unit as f64]);
        if !(TEXTURE0..TEXTURE0 + TEXTURE_UNITS).contains(&unit) {
            self.fail("activeTexture", INVALID_ENUM);
            return;
        }
        self.state.borrow_mut().active_texture = unit;
    }

    pub fn bind_texture(&self, target: u32, texture: Option<Rc<GlTexture>>) {
        self.record(
            "bindTexture",
            &[target as f64, texture.as_ref().map_or(0.0, |t| t.id as f64)],
        );
        if target != TEXTURE_2D && target != TEXTURE_CUBE_MAP {
            self.fail("bindTexture", INVALID_ENUM);
            return;
        }
        if texture.as_ref().is_some_and(|t| t.deleted.get()) {
            self.fail("bindTexture", INVALID_OPERATION);
            return;
        }
        let mut state = self.state.borrow_mut();
        let key = (state.active_texture, target);
        match texture {
            Some(t) => state.textures.insert(key, t),
            None => state.textures.remove(&key),
        };
    }

    pub fn bound_texture(&self, target: u32) -> Option<Rc<GlTexture>> {
        let state = self.state.borrow();
        state.textures.get(&(state.active_texture, target)).cloned()
    }

    fn texture_target(&self, call: &str, target: u32) -> Option<Rc<GlTexture>> {
        if target != TEXTURE_2D && target != TEXTURE_CUBE_MAP {
            self.fail(call, INVALID_ENUM);
            return None;
        }
        let texture = self.bound_texture(target);
        if texture.is_none() {
            self.fail(call, INVALID_OPERATION);
        }
        texture
    }

    pub fn tex_parameteri(&self, target: u32, pname: u32, param: i32) {
        self.record("texParameteri", &[target as f64, pname as f64, param as f64]);
        if let Some(texture) = self.texture_target("texParameteri", target) {
            texture.params.borrow_mut().insert(pname, param);
        }
    }

    pub fn pixel_storei(&self, pname: u32, param: i32) {
        self.record("pixelStorei", &[pname as f64, param as f64]);
        if pname == UNPACK_ALIGNMENT {
            if !matches!(param, 1 | 2 | 4 | 8) {
                self.fail("pixelStorei", INVALID_VALUE);
                return;
            }
            self.state.borrow_mut().unpack_alignment = param;
        }
    }

    /// Bytes an upload of `width` x `height` pixels needs under the current
    /// unpack alignment.
    fn image_size(&self, format: u32, width: i32, height: i32) -> Option<usize> {
        let bpp = match format {
            RGBA => 4,
            RGB => 3,
            LUMINANCE_ALPHA => 2,
            LUMINANCE | ALPHA => 1,
            _ => return None,
        };
        if width == 0 || height == 0 {
            return Some(0);
        }
        let align = self.state.borrow().unpack_alignment as usize;
        let row = width as usize * bpp;
        let padded = row.div_ceil(align) * align;
        Some(padded * (height as usize - 1) + row)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        border: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        self.record(
            "texImage2D",
            &[
                target as f64,
                level as f64,
                internal_format as f64,
                width as f64,
                height as f64,
                border as f64,
                format as f64,
                ty as f64,
            ],
        );
        if border != 0 || level < 0 || width < 0 || height < 0 {
            self.fail("texImage2D", INVALID_VALUE);
            return;
        }
        if width as u32 > TEXTURE_SIZE || height as u32 > TEXTURE_SIZE {
            self.fail("texImage2D", INVALID_VALUE);
            return;
        }
        if ty != UNSIGNED_BYTE {
            self.fail("texImage2D", INVALID_ENUM);
            return;
        }
        let Some(needed) = self.image_size(format, width, height) else {
            self.fail("texImage2D", INVALID_ENUM);
            return;
        };
        let Some(texture) = self.texture_target("texImage2D", target) else {
            return;
        };
        if let Some(pixels) = pixels {
            if pixels.len() < needed {
                self.fail("texImage2D", INVALID_OPERATION);
                return;
            }
        }
        texture
            .levels
            .borrow_mut()
            .insert(level, (width as u32, height as u32));
    }

    pub fn generate_mipmap(&self, target: u32) {
        self.record("generateMipmap", &[target as f64]);
        let Some(texture) = self.texture_target("generateMipmap", target) else {
            return;
        };
        if texture.level_size(0).is_none() {
            self.fail("generateMipmap", INVALID_OPERATION);
            return;
        }
        texture.mipmapped.set(true);
    }

    pub fn delete_texture(&self, texture: Option<&GlTexture>) {
        let Some(texture) = texture else { return };
        self.record("deleteTexture", &[texture.id as f64]);
        texture.deleted.set(true);
        self.state
            .borrow_mut()
            .textures
            .retain(|_, bound| bound.id != texture.id);
    }

    // ------------------------------------------------------------
    // Fixed-function state
    // ------------------------------------------------------------

    pub fn enable(&self, cap: u32) {
        self.record("enable", &[cap as f64]);
        self.state.borrow_mut().enabled.insert(cap);
    }

    pub fn disable(&self, cap: u32) {
        self.record("disable", &[cap as f64]);
        self.state.borrow_mut().enabled.remove(&cap);
    }

    pub fn depth_func(&self, func: u32) {
        self.record("depthFunc", &[func as f64]);
        if !(0x0200..=0x0207).contains(&func) {
            self.fail("depthFunc", INVALID_ENUM);
            return;
        }
        self.state.borrow_mut().raster.depth_func = func;
    }

    pub fn blend_equation(&self, mode: u32) {
        self.record("blendEquation", &[mode as f64]);
        self.state.borrow_mut().raster.blend_equation = mode;
    }

    pub fn blend_func(&self, src: u32, dst: u32) {
        self.record("blendFunc", &[src as f64, dst as f64]);
        self.state.borrow_mut().raster.blend_func = (src, dst);
    }

    pub fn cull_face(&self, mode: u32) {
        self.record("cullFace", &[mode as f64]);
        self.state.borrow_mut().raster.cull_face = mode;
    }

    pub fn set_clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.record("clearColor", &[r as f64, g as f64, b as f64, a as f64]);
        self.state.borrow_mut().clear_color = [r, g, b, a].map(|c| c.clamp(0.0, 1.0));
    }

    pub fn clear(&self, mask: u32) {
        self.record("clear", &[mask as f64]);
        // COLOR | DEPTH | STENCIL buffer bits
        if mask & !(0x4000 | 0x0100 | 0x0400) != 0 {
            self.fail("clear", INVALID_VALUE);
        }
    }

    pub fn set_viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.record("viewport", &[x as f64, y as f64, width as f64, height as f64]);
        if width < 0 || height < 0 {
            self.fail("viewport", INVALID_VALUE);
            return;
        }
        self.state.borrow_mut().viewport = [x, y, width, height];
    }

    // ------------------------------------------------------------
    // Vertex input and drawing
    // ------------------------------------------------------------

    pub fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        self.record(
            "vertexAttribPointer",
            &[
                index as f64,
                size as f64,
                ty as f64,
                normalized as u8 as f64,
                stride as f64,
                offset as f64,
            ],
        );
        if index >= VERTEX_ATTRIBS || !(1..=4).contains(&size) || stride < 0 || offset < 0 {
            self.fail("vertexAttribPointer", INVALID_VALUE);
            return;
        }
        let mut state = self.state.borrow_mut();
        if state.array_buffer.is_none() && offset != 0 {
            drop(state);
            self.fail("vertexAttribPointer", INVALID_OPERATION);
            return;
        }
        let attrib = state.attribs.entry(index).or_default();
        attrib.size = size;
        attrib.ty = ty;
        attrib.normalized = normalized;
        attrib.stride = stride;
        attrib.offset = offset;
    }

    pub fn set_vertex_attrib_array(&self, index: u32, enabled: bool) {
        self.record(
            if enabled {
                "enableVertexAttribArray"
            } else {
                "disableVertexAttribArray"
            },
            &[index as f64],
        );
        if index >= VERTEX_ATTRIBS {
            self.fail("vertexAttribArray", INVALID_VALUE);
            return;
        }
        self.state.borrow_mut().attribs.entry(index).or_default().enabled = enabled;
    }

    pub fn draw_elements(&self, mode: u32, count: i32, ty: u32, offset: i32) {
        self.record(
            "drawElements",
            &[mode as f64, count as f64, ty as f64, offset as f64],
        );
        if mode > 6 {
            self.fail("drawElements", INVALID_ENUM);
            return;
        }
        if count < 0 || offset < 0 {
            self.fail("drawElements", INVALID_VALUE);
            return;
        }
        let ready = {
            let state = self.state.borrow();
            state.program.is_some() && state.element_buffer.is_some()
        };
        if !ready {
            self.fail("drawElements", INVALID_OPERATION);
            return;
        }
        self.draw_calls.set(self.draw_calls.get() + 1);
    }

    // ------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------

    pub fn parameter(&self, pname: u32) -> HostValue {
        self.record("getParameter", &[pname as f64]);
        match (pname, self.version) {
            (VENDOR, _) => HostValue::from("gru"),
            (RENDERER, _) => HostValue::from("gru-glue headless"),
            (VERSION, GlVersion::WebGl1) => HostValue::from("WebGL 1.0 (gru-glue headless)"),
            (VERSION, GlVersion::WebGl2) => HostValue::from("WebGL 2.0 (gru-glue headless)"),
            (SHADING_LANGUAGE_VERSION, GlVersion::WebGl1) => HostValue::from("WebGL GLSL ES 1.0"),
            (SHADING_LANGUAGE_VERSION, GlVersion::WebGl2) => HostValue::from("WebGL GLSL ES 3.00"),
            (MAX_TEXTURE_SIZE, _) => HostValue::from(TEXTURE_SIZE as f64),
            (MAX_VERTEX_ATTRIBS, _) => HostValue::from(VERTEX_ATTRIBS as f64),
            (MAX_TEXTURE_IMAGE_UNITS, _) => HostValue::from(TEXTURE_UNITS as f64),
            (VIEWPORT, _) => HostValue::array(
                self.viewport()
                    .iter()
                    .map(|v| HostValue::from(*v as f64))
                    .collect(),
            ),
            _ => {
                self.fail("getParameter", INVALID_ENUM);
                HostValue::Null
            }
        }
    }

    pub fn supported_extensions(&self) -> &'static [&'static str] {
        match self.version {
            GlVersion::WebGl1 => WEBGL1_EXTENSIONS,
            GlVersion::WebGl2 => WEBGL2_EXTENSIONS,
        }
    }

    /// Extension names match case-insensitively.
    pub fn extension(&self, name: &str) -> Option<GlExtension> {
        self.record("getExtension", &[]);
        self.supported_extensions()
            .iter()
            .find(|ext| ext.eq_ignore_ascii_case(name))
            .map(|&name| GlExtension { name })
    }
}

// ============================================================
// GLSL declarations
// ============================================================

#[derive(Debug, Default)]
struct Declarations {
    attributes: Vec<ActiveInfo>,
    uniforms: Vec<ActiveInfo>,
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map_or("", |nl| &after[nl..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |end| &after[end + 2..]);
            out.push(' ');
        } else {
            let ch = rest.chars().next().unwrap_or(' ');
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    out
}

fn type_enum(ty: &str) -> Option<u32> {
    Some(match ty {
        "float" => 0x1406,
        "vec2" => 0x8B50,
        "vec3" => 0x8B51,
        "vec4" => 0x8B52,
        "int" => 0x1404,
        "ivec2" => 0x8B53,
        "ivec3" => 0x8B54,
        "ivec4" => 0x8B55,
        "bool" => 0x8B56,
        "mat2" => 0x8B5A,
        "mat3" => 0x8B5B,
        "mat4" => 0x8B5C,
        "sampler2D" => 0x8B5E,
        "samplerCube" => 0x8B60,
        _ => return None,
    })
}

fn is_qualifier(token: &str) -> bool {
    matches!(
        token,
        "highp" | "mediump" | "lowp" | "flat" | "smooth" | "centroid" | "invariant"
    )
}

/// Active attributes (vertex stage only) and uniforms declared in `source`.
fn parse_declarations(source: &str, vertex: bool) -> Declarations {
    let code: String = strip_comments(source)
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    let mut decls = Declarations::default();
    for statement in code.split(';') {
        // Only what follows the last brace can be a global declaration.
        let mut statement = statement.rsplit(['{', '}']).next().unwrap_or("").trim();
        if let Some(rest) = statement.strip_prefix("layout") {
            statement = rest.split_once(')').map_or("", |(_, decl)| decl.trim());
        }
        let mut tokens = statement.split_whitespace().filter(|t| !is_qualifier(t));
        let storage = tokens.next();
        let list = match storage {
            Some("uniform") => &mut decls.uniforms,
            Some("attribute") | Some("in") if vertex => &mut decls.attributes,
            _ => continue,
        };
        let Some(ty) = tokens.next().and_then(type_enum) else {
            continue;
        };
        let names: String = tokens.collect::<Vec<_>>().join(" ");
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let (name, size) = match name.split_once('[') {
                Some((base, len)) => {
                    let len = len.trim_end_matches(']').trim().parse().unwrap_or(1);
                    (format!("{}[0]", base.trim()), len)
                }
                None => (name.to_string(), 1),
            };
            if !list.iter().any(|info| info.name == name) {
                list.push(ActiveInfo { name, size, ty });
            }
        }
    }
    decls
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "#version 300 es
        // camera
        uniform mat4 u_view, u_proj;
        layout(location = 0) in vec3 a_pos;
        in vec2 a_uv;
        out vec2 v_uv;
        void main() { v_uv = a_uv; gl_Position = u_proj * u_view * vec4(a_pos, 1.0); }";

    const FS: &str = "#version 300 es
        precision mediump float;
        /* texture */ uniform sampler2D u_tex;
        uniform mediump float u_weights[4];
        in vec2 v_uv;
        out vec4 color;
        void main() { color = texture(u_tex, v_uv); }";

    fn linked(ctx: &GlContext) -> Rc<GlProgram> {
        let vs = ctx.create_shader(VERTEX_SHADER).unwrap();
        ctx.shader_source(&vs, VS);
        ctx.compile_shader(&vs);
        let fs = ctx.create_shader(FRAGMENT_SHADER).unwrap();
        ctx.shader_source(&fs, FS);
        ctx.compile_shader(&fs);
        let program = ctx.create_program();
        ctx.attach_shader(&program, vs);
        ctx.attach_shader(&program, fs);
        ctx.link_program(&program);
        program
    }

    #[test]
    fn test_reflection_from_declarations() {
        let ctx = GlContext::new(GlVersion::WebGl2, 300, 150);
        let program = linked(&ctx);
        assert!(program.is_linked());

        let attrs: Vec<_> = (0..2).filter_map(|i| ctx.active_attrib(&program, i)).collect();
        assert_eq!(attrs[0].name, "a_pos");
        assert_eq!(attrs[0].ty, 0x8B51);
        assert_eq!(attrs[1].name, "a_uv");
        assert_eq!(
            ctx.program_parameter(&program, ACTIVE_UNIFORMS).as_f64(),
            Some(4.0)
        );
        let weights = ctx.active_uniform(&program, 3).unwrap();
        assert_eq!((weights.name.as_str(), weights.size), ("u_weights[0]", 4));

        assert!(ctx.active_attrib(&program, 2).is_none());
        assert_eq!(ctx.take_error(), INVALID_VALUE);
        assert_eq!(ctx.take_error(), NO_ERROR);
    }

    #[test]
    fn test_compile_and_link_failures() {
        let ctx = GlContext::new(GlVersion::WebGl1, 300, 150);
        let shader = ctx.create_shader(VERTEX_SHADER).unwrap();
        ctx.shader_source(&shader, "// main\nvoid entry() {}");
        ctx.compile_shader(&shader);
        assert_eq!(ctx.shader_parameter(&shader, COMPILE_STATUS).as_bool(), Some(false));
        assert!(ctx.shader_info_log(&shader).contains("main"));

        let program = ctx.create_program();
        ctx.attach_shader(&program, shader);
        ctx.link_program(&program);
        assert_eq!(ctx.program_parameter(&program, LINK_STATUS).as_bool(), Some(false));
        assert!(!ctx.program_info_log(&program).is_empty());

        assert!(ctx.create_shader(0x1234).is_none());
        assert_eq!(ctx.take_error(), INVALID_ENUM);
    }

    #[test]
    fn test_uniforms_need_current_program() {
        let ctx = GlContext::new(GlVersion::WebGl1, 300, 150);
        let program = linked(&ctx);
        let loc = ctx.uniform_location(&program, "u_view").unwrap();
        assert!(ctx.uniform_location(&program, "u_missing").is_none());
        assert_eq!(
            ctx.uniform_location(&program, "u_weights").map(|l| l.name),
            Some("u_weights[0]".to_string())
        );

        let identity = glam::Mat4::IDENTITY.to_cols_array();
        ctx.uniform_matrix4fv(Some(&loc), false, &identity);
        assert_eq!(ctx.take_error(), INVALID_OPERATION);

        ctx.use_program(Some(Rc::clone(&program)));
        ctx.uniform_matrix4fv(Some(&loc), true, &identity);
        assert_eq!(ctx.take_error(), INVALID_VALUE);
        let m = glam::Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        ctx.uniform_matrix4fv(Some(&loc), false, &m.to_cols_array());
        assert_eq!(program.uniform("u_view"), Some(UniformValue::Mat4(m)));
        ctx.uniform1i(None, 3);
        assert_eq!(ctx.take_error(), NO_ERROR);
    }

    #[test]
    fn test_buffers_and_draw_validation() {
        let ctx = GlContext::new(GlVersion::WebGl2, 300, 150);
        ctx.draw_elements(4, 3, 0x1403, 0);
        assert_eq!(ctx.take_error(), INVALID_OPERATION);

        let buffer = ctx.create_buffer();
        ctx.buffer_data(ELEMENT_ARRAY_BUFFER, 6, STATIC_DRAW);
        assert_eq!(ctx.take_error(), INVALID_OPERATION);
        ctx.bind_buffer(ELEMENT_ARRAY_BUFFER, Some(Rc::clone(&buffer)));
        ctx.buffer_data(ELEMENT_ARRAY_BUFFER, 6, 0x9999);
        assert_eq!(ctx.take_error(), INVALID_ENUM);
        ctx.buffer_data(ELEMENT_ARRAY_BUFFER, 6, STATIC_DRAW);
        ctx.buffer_sub_data(ELEMENT_ARRAY_BUFFER, 2, &[1, 0, 2, 0]);
        assert_eq!(buffer.data(), vec![0, 0, 1, 0, 2, 0]);
        ctx.buffer_sub_data(ELEMENT_ARRAY_BUFFER, 4, &[1, 0, 2, 0]);
        assert_eq!(ctx.take_error(), INVALID_VALUE);

        ctx.use_program(Some(linked(&ctx)));
        ctx.draw_elements(4, 3, 0x1403, 0);
        assert_eq!(ctx.take_error(), NO_ERROR);
        assert_eq!(ctx.draw_calls(), 1);
        assert_eq!(
            ctx.commands().last().map(ToString::to_string),
            Some("drawElements(4, 3, 5123, 0)".to_string())
        );
    }

    #[test]
    fn test_tex_image_respects_unpack_alignment() {
        let ctx = GlContext::new(GlVersion::WebGl1, 300, 150);
        let texture = ctx.create_texture();
        ctx.bind_texture(TEXTURE_2D, Some(Rc::clone(&texture)));
        // 3x2 RGB rows are 9 bytes, padded to 12 under the default alignment.
        ctx.tex_image_2d(TEXTURE_2D, 0, RGB as i32, 3, 2, 0, RGB, UNSIGNED_BYTE, Some(&[0; 18]));
        assert_eq!(ctx.take_error(), INVALID_OPERATION);
        ctx.tex_image_2d(TEXTURE_2D, 0, RGB as i32, 3, 2, 0, RGB, UNSIGNED_BYTE, Some(&[0; 21]));
        assert_eq!(ctx.take_error(), NO_ERROR);
        ctx.pixel_storei(UNPACK_ALIGNMENT, 1);
        ctx.tex_image_2d(TEXTURE_2D, 1, RGB as i32, 3, 2, 0, RGB, UNSIGNED_BYTE, Some(&[0; 18]));
        assert_eq!(ctx.take_error(), NO_ERROR);
        assert_eq!(texture.level_size(1), Some((3, 2)));

        ctx.generate_mipmap(TEXTURE_2D);
        assert!(texture.is_mipmapped());
        ctx.delete_texture(Some(&texture));
        assert!(ctx.bound_texture(TEXTURE_2D).is_none());
    }

    #[test]
    fn test_parameters_and_extensions() {
        let v1 = GlContext::new(GlVersion::WebGl1, 640, 480);
        assert_eq!(v1.parameter(VERSION).as_str(), Some("WebGL 1.0 (gru-glue headless)"));
        let viewport = v1.parameter(VIEWPORT);
        assert_eq!(crate::host::js::property(&viewport, "2").as_f64(), Some(640.0));
        assert!(v1.parameter(0xFFFF).is_like_none());
        assert_eq!(v1.take_error(), INVALID_ENUM);
        assert_eq!(v1.extension("oes_texture_float").map(|e| e.name), Some("OES_texture_float"));

        let v2 = GlContext::new(GlVersion::WebGl2, 640, 480);
        assert!(v2.extension("OES_texture_float").is_none());
        assert!(v2.supported_extensions().contains(&"EXT_color_buffer_float"));
    }

    #[test]
    fn test_command_log_is_bounded() {
        let ctx = GlContext::new(GlVersion::WebGl1, 1, 1);
        for _ in 0..COMMAND_LOG + 10 {
            ctx.clear(0x4000);
        }
        assert_eq!(ctx.commands().len(), COMMAND_LOG);
        assert_eq!(ctx.total_commands(), COMMAND_LOG as u64 + 10);
    }
}
