//! WebGL entry points.
//!
//! The bindings generator emits one import per method for each of the
//! WebGL 1 and WebGL 2 interfaces; both variants of a method share a
//! signature and land on the same adapter here.

use std::rc::Rc;

use gru_glue_core::string::{f32_array_from_guest, write_string_ret};
use gru_glue_core::HostValue;

use super::sig::*;
use super::{new_handle, object, optional, optional_handle, shared, string_arg, value, Args, Binding, Ret};
use crate::host::gl::{ActiveInfo, GlBuffer, GlContext, GlProgram, GlShader, GlTexture, UniformLocation};
use crate::host::typed_array;
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    // Shaders and programs
    Binding::new("WebGl.createShader", "createShader", II, I, create_shader),
    Binding::new("WebGl.shaderSource", "shaderSource", IIII, NONE, shader_source),
    Binding::new("WebGl.compileShader", "compileShader", II, NONE, compile_shader),
    Binding::new("WebGl.getShaderParameter", "getShaderParameter", III, I, shader_parameter),
    Binding::new("WebGl.getShaderInfoLog", "getShaderInfoLog", III, NONE, shader_info_log),
    Binding::new("WebGl.deleteShader", "deleteShader", II, NONE, delete_shader),
    Binding::new("WebGl.createProgram", "createProgram", I, I, create_program),
    Binding::new("WebGl.attachShader", "attachShader", III, NONE, attach_shader),
    Binding::new("WebGl.detachShader", "detachShader", III, NONE, detach_shader),
    Binding::new("WebGl.bindAttribLocation", "bindAttribLocation", IIIII, NONE, bind_attrib_location),
    Binding::new("WebGl.linkProgram", "linkProgram", II, NONE, link_program),
    Binding::new("WebGl.getProgramParameter", "getProgramParameter", III, I, program_parameter),
    Binding::new("WebGl.getProgramInfoLog", "getProgramInfoLog", III, NONE, program_info_log),
    Binding::new("WebGl.useProgram", "useProgram", II, NONE, use_program),
    Binding::new("WebGl.deleteProgram", "deleteProgram", II, NONE, delete_program),
    Binding::new("WebGl.getActiveAttrib", "getActiveAttrib", III, I, active_attrib),
    Binding::new("WebGl.getActiveUniform", "getActiveUniform", III, I, active_uniform),
    Binding::new("WebGlActiveInfo.size", "size", I, I, info_size),
    Binding::new("WebGlActiveInfo.type", "type", I, I, info_type),
    Binding::new("WebGlActiveInfo.name", "name", II, NONE, info_name),
    Binding::new("WebGl.getUniformLocation", "getUniformLocation", IIII, I, uniform_location),
    Binding::new("WebGl.uniformMatrix4fv", "uniformMatrix4fv", IIIII, NONE, uniform_matrix4fv),
    Binding::new("WebGl.uniform1i", "uniform1i", III, NONE, uniform1i),
    // Buffers
    Binding::new("WebGl.createBuffer", "createBuffer", I, I, create_buffer),
    Binding::new("WebGl.bindBuffer", "bindBuffer", III, NONE, bind_buffer),
    Binding::new("WebGl.bufferData", "bufferData", IIII, NONE, buffer_data),
    Binding::new("WebGl.bufferSubData", "bufferSubData", IIII, NONE, buffer_sub_data),
    Binding::new("WebGl.deleteBuffer", "deleteBuffer", II, NONE, delete_buffer),
    // Textures
    Binding::new("WebGl.createTexture", "createTexture", I, I, create_texture),
    Binding::new("WebGl.activeTexture", "activeTexture", II, NONE, active_texture),
    Binding::new("WebGl.bindTexture", "bindTexture", III, NONE, bind_texture),
    Binding::new("WebGl.texParameteri", "texParameteri", IIII, NONE, tex_parameteri),
    Binding::new("WebGl.pixelStorei", "pixelStorei", III, NONE, pixel_storei),
    Binding::new("WebGl.texImage2D", "texImage2D", I10, NONE, tex_image_2d).catching(),
    Binding::new("WebGl.generateMipmap", "generateMipmap", II, NONE, generate_mipmap),
    Binding::new("WebGl.deleteTexture", "deleteTexture", II, NONE, delete_texture),
    // Fixed-function state
    Binding::new("WebGl.enable", "enable", II, NONE, enable),
    Binding::new("WebGl.disable", "disable", II, NONE, disable),
    Binding::new("WebGl.depthFunc", "depthFunc", II, NONE, depth_func),
    Binding::new("WebGl.blendEquation", "blendEquation", II, NONE, blend_equation),
    Binding::new("WebGl.blendFunc", "blendFunc", III, NONE, blend_func),
    Binding::new("WebGl.cullFace", "cullFace", II, NONE, cull_face),
    Binding::new("WebGl.clearColor", "clearColor", IFFFF, NONE, clear_color),
    Binding::new("WebGl.clear", "clear", II, NONE, clear),
    Binding::new("WebGl.viewport", "viewport", IIIII, NONE, viewport),
    // Vertex input and drawing
    Binding::new("WebGl.vertexAttribPointer", "vertexAttribPointer", I7, NONE, vertex_attrib_pointer),
    Binding::new(
        "WebGl.enableVertexAttribArray",
        "enableVertexAttribArray",
        II,
        NONE,
        enable_vertex_attrib_array,
    ),
    Binding::new(
        "WebGl.disableVertexAttribArray",
        "disableVertexAttribArray",
        II,
        NONE,
        disable_vertex_attrib_array,
    ),
    Binding::new("WebGl.drawElements", "drawElements", IIIII, NONE, draw_elements),
    // Queries
    Binding::new("WebGl.getParameter", "getParameter", II, I, parameter).catching(),
    Binding::new("WebGl.getExtension", "getExtension", III, I, extension).catching(),
    Binding::new("WebGl.getSupportedExtensions", "getSupportedExtensions", I, I, supported_extensions),
];

fn gl(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Rc<GlContext>> {
    object::<GlContext>(cx, args.handle(0)?)
}

// ------------------------------------------------------------
// Shaders and programs
// ------------------------------------------------------------

fn create_shader(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let shader = gl(cx, args)?.create_shader(args.u32(1)?);
    Ok(optional_handle(cx, HostValue::from(shader.map(shared))))
}

fn shader_source(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let shader = object::<GlShader>(cx, args.handle(1)?)?;
    let source = string_arg(cx, args, 2)?;
    ctx.shader_source(&shader, &source);
    Ok(Ret::Unit)
}

fn compile_shader(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let shader = object::<GlShader>(cx, args.handle(1)?)?;
    ctx.compile_shader(&shader);
    if !shader.is_compiled() {
        log::debug!("shader {} failed to compile: {}", shader.id, ctx.shader_info_log(&shader));
    }
    Ok(Ret::Unit)
}

fn shader_parameter(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let shader = object::<GlShader>(cx, args.handle(1)?)?;
    let v = ctx.shader_parameter(&shader, args.u32(2)?);
    Ok(new_handle(cx, v))
}

/// `(retptr, ctx, shader)`.
fn shader_info_log(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = object::<GlContext>(cx, args.handle(1)?)?;
    let shader = object::<GlShader>(cx, args.handle(2)?)?;
    let log = ctx.shader_info_log(&shader);
    write_string_ret(cx, args.u32(0)?, Some(&log))?;
    Ok(Ret::Unit)
}

fn delete_shader(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let shader = optional::<GlShader>(cx, args.handle(1)?)?;
    ctx.delete_shader(shader.as_deref());
    Ok(Ret::Unit)
}

fn create_program(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let program = gl(cx, args)?.create_program();
    Ok(optional_handle(cx, shared(program)))
}

fn attach_shader(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let shader = object::<GlShader>(cx, args.handle(2)?)?;
    ctx.attach_shader(&program, shader);
    Ok(Ret::Unit)
}

fn detach_shader(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let shader = object::<GlShader>(cx, args.handle(2)?)?;
    ctx.detach_shader(&program, &shader);
    Ok(Ret::Unit)
}

fn bind_attrib_location(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let name = string_arg(cx, args, 3)?;
    ctx.bind_attrib_location(&program, args.u32(2)?, &name);
    Ok(Ret::Unit)
}

fn link_program(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    ctx.link_program(&program);
    if !program.is_linked() {
        log::debug!("program {} failed to link: {}", program.id, ctx.program_info_log(&program));
    }
    Ok(Ret::Unit)
}

fn program_parameter(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let v = ctx.program_parameter(&program, args.u32(2)?);
    Ok(new_handle(cx, v))
}

/// `(retptr, ctx, program)`.
fn program_info_log(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = object::<GlContext>(cx, args.handle(1)?)?;
    let program = object::<GlProgram>(cx, args.handle(2)?)?;
    let log = ctx.program_info_log(&program);
    write_string_ret(cx, args.u32(0)?, Some(&log))?;
    Ok(Ret::Unit)
}

fn use_program(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = optional::<GlProgram>(cx, args.handle(1)?)?;
    ctx.use_program(program);
    Ok(Ret::Unit)
}

fn delete_program(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = optional::<GlProgram>(cx, args.handle(1)?)?;
    ctx.delete_program(program.as_deref());
    Ok(Ret::Unit)
}

fn active_attrib(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let info = ctx.active_attrib(&program, args.u32(2)?);
    Ok(optional_handle(cx, HostValue::from(info.map(HostValue::object))))
}

fn active_uniform(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let info = ctx.active_uniform(&program, args.u32(2)?);
    Ok(optional_handle(cx, HostValue::from(info.map(HostValue::object))))
}

fn info_size(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::I32(object::<ActiveInfo>(cx, args.handle(0)?)?.size))
}

fn info_type(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    Ok(Ret::u32(object::<ActiveInfo>(cx, args.handle(0)?)?.ty))
}

fn info_name(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let info = object::<ActiveInfo>(cx, args.handle(1)?)?;
    write_string_ret(cx, args.u32(0)?, Some(&info.name))?;
    Ok(Ret::Unit)
}

fn uniform_location(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let program = object::<GlProgram>(cx, args.handle(1)?)?;
    let name = string_arg(cx, args, 2)?;
    let location = ctx.uniform_location(&program, &name);
    Ok(optional_handle(cx, HostValue::from(location.map(HostValue::object))))
}

fn uniform_matrix4fv(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let location = optional::<UniformLocation>(cx, args.handle(1)?)?;
    let data = f32_array_from_guest(cx, args.u32(3)?, args.u32(4)?)?;
    ctx.uniform_matrix4fv(location.as_deref(), args.bool(2)?, &data);
    Ok(Ret::Unit)
}

fn uniform1i(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let location = optional::<UniformLocation>(cx, args.handle(1)?)?;
    ctx.uniform1i(location.as_deref(), args.i32(2)?);
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Buffers
// ------------------------------------------------------------

fn create_buffer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let buffer = gl(cx, args)?.create_buffer();
    Ok(optional_handle(cx, shared(buffer)))
}

fn bind_buffer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let buffer = optional::<GlBuffer>(cx, args.handle(2)?)?;
    ctx.bind_buffer(args.u32(1)?, buffer);
    Ok(Ret::Unit)
}

fn buffer_data(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    ctx.buffer_data(args.u32(1)?, args.i32(2)?, args.u32(3)?);
    Ok(Ret::Unit)
}

/// The data argument is a typed array, usually a view into guest memory.
fn buffer_sub_data(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let data = value(cx, args.handle(3)?);
    let bytes = typed_array::source_bytes(cx, &data)?;
    ctx.buffer_sub_data(args.u32(1)?, args.i32(2)?, &bytes);
    Ok(Ret::Unit)
}

fn delete_buffer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let buffer = optional::<GlBuffer>(cx, args.handle(1)?)?;
    ctx.delete_buffer(buffer.as_deref());
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Textures
// ------------------------------------------------------------

fn create_texture(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let texture = gl(cx, args)?.create_texture();
    Ok(optional_handle(cx, shared(texture)))
}

fn active_texture(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.active_texture(args.u32(1)?);
    Ok(Ret::Unit)
}

fn bind_texture(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let texture = optional::<GlTexture>(cx, args.handle(2)?)?;
    ctx.bind_texture(args.u32(1)?, texture);
    Ok(Ret::Unit)
}

fn tex_parameteri(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.tex_parameteri(args.u32(1)?, args.u32(2)?, args.i32(3)?);
    Ok(Ret::Unit)
}

fn pixel_storei(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.pixel_storei(args.u32(1)?, args.i32(2)?);
    Ok(Ret::Unit)
}

/// `texImage2D(target, level, internalformat, width, height, border,
/// format, type, pixels)`; `pixels` may be null.
fn tex_image_2d(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let pixels = value(cx, args.handle(9)?);
    let pixels = if pixels.is_like_none() {
        None
    } else {
        Some(typed_array::source_bytes(cx, &pixels)?)
    };
    ctx.tex_image_2d(
        args.u32(1)?,
        args.i32(2)?,
        args.i32(3)?,
        args.i32(4)?,
        args.i32(5)?,
        args.i32(6)?,
        args.u32(7)?,
        args.u32(8)?,
        pixels.as_deref(),
    );
    Ok(Ret::Unit)
}

fn generate_mipmap(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.generate_mipmap(args.u32(1)?);
    Ok(Ret::Unit)
}

fn delete_texture(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let texture = optional::<GlTexture>(cx, args.handle(1)?)?;
    ctx.delete_texture(texture.as_deref());
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Fixed-function state
// ------------------------------------------------------------

fn enable(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.enable(args.u32(1)?);
    Ok(Ret::Unit)
}

fn disable(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.disable(args.u32(1)?);
    Ok(Ret::Unit)
}

fn depth_func(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.depth_func(args.u32(1)?);
    Ok(Ret::Unit)
}

fn blend_equation(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.blend_equation(args.u32(1)?);
    Ok(Ret::Unit)
}

fn blend_func(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.blend_func(args.u32(1)?, args.u32(2)?);
    Ok(Ret::Unit)
}

fn cull_face(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.cull_face(args.u32(1)?);
    Ok(Ret::Unit)
}

fn clear_color(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.set_clear_color(args.f32(1)?, args.f32(2)?, args.f32(3)?, args.f32(4)?);
    Ok(Ret::Unit)
}

fn clear(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.clear(args.u32(1)?);
    Ok(Ret::Unit)
}

fn viewport(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.set_viewport(args.i32(1)?, args.i32(2)?, args.i32(3)?, args.i32(4)?);
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Vertex input and drawing
// ------------------------------------------------------------

fn vertex_attrib_pointer(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.vertex_attrib_pointer(
        args.u32(1)?,
        args.i32(2)?,
        args.u32(3)?,
        args.bool(4)?,
        args.i32(5)?,
        args.i32(6)?,
    );
    Ok(Ret::Unit)
}

fn enable_vertex_attrib_array(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.set_vertex_attrib_array(args.u32(1)?, true);
    Ok(Ret::Unit)
}

fn disable_vertex_attrib_array(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.set_vertex_attrib_array(args.u32(1)?, false);
    Ok(Ret::Unit)
}

fn draw_elements(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    gl(cx, args)?.draw_elements(args.u32(1)?, args.i32(2)?, args.u32(3)?, args.i32(4)?);
    Ok(Ret::Unit)
}

// ------------------------------------------------------------
// Queries
// ------------------------------------------------------------

fn parameter(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let v = gl(cx, args)?.parameter(args.u32(1)?);
    Ok(new_handle(cx, v))
}

fn extension(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let ctx = gl(cx, args)?;
    let name = string_arg(cx, args, 1)?;
    let ext = ctx.extension(&name);
    if ext.is_none() {
        log::debug!("extension `{name}` is not available on {:?}", ctx.version);
    }
    Ok(optional_handle(cx, HostValue::from(ext.map(HostValue::object))))
}

fn supported_extensions(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let names = gl(cx, args)?
        .supported_extensions()
        .iter()
        .map(|&name| HostValue::from(name))
        .collect();
    Ok(optional_handle(cx, HostValue::array(names)))
}
