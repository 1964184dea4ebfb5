//! Shader programs and their introspection tables.
//!
//! A program is created from WGSL source plus declared attribute/uniform
//! tables. The tables play the role GL introspection plays in classic
//! renderers: the group optimizer consults them to resolve attribute
//! bindings to shader locations, and uniform writes are resolved to byte
//! offsets inside the program's single uniform block.
//!
//! Programs may carry a paired *pick* variant: a module with the same
//! attribute locations for every shared attribute plus a `pickId` attribute,
//! whose fragment stage outputs the object id as a color.

use crate::context::Context;
use crate::error::{Error, Result};

/// Shape of a shader variable (attribute or uniform).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderType {
    /// `i32`
    IVec1,
    /// `vec2<i32>`
    IVec2,
    /// `vec3<i32>`
    IVec3,
    /// `vec4<i32>`
    IVec4,
    /// `u32`
    UVec1,
    /// `vec2<u32>`
    UVec2,
    /// `vec3<u32>`
    UVec3,
    /// `vec4<u32>`
    UVec4,
    /// `f32`
    FVec1,
    /// `vec2<f32>`
    FVec2,
    /// `vec3<f32>`
    FVec3,
    /// `vec4<f32>`
    FVec4,
    /// `mat2x2<f32>`
    Mat2x2,
    /// `mat3x3<f32>`
    Mat3x3,
    /// `mat4x4<f32>`
    Mat4x4,
}

impl ShaderType {
    /// Number of vertex attribute locations this type occupies and number of
    /// elements per location.
    ///
    /// A `mat4x4` attribute spans four consecutive locations of four
    /// elements each; every vector type fits in one location.
    pub fn location_info(self) -> (u32, u32) {
        match self {
            ShaderType::IVec1 | ShaderType::UVec1 | ShaderType::FVec1 => (1, 1),
            ShaderType::IVec2 | ShaderType::UVec2 | ShaderType::FVec2 => (1, 2),
            ShaderType::IVec3 | ShaderType::UVec3 | ShaderType::FVec3 => (1, 3),
            ShaderType::IVec4 | ShaderType::UVec4 | ShaderType::FVec4 => (1, 4),
            ShaderType::Mat2x2 => (2, 2),
            ShaderType::Mat3x3 => (3, 3),
            ShaderType::Mat4x4 => (4, 4),
        }
    }

    /// Alignment of this type in the WGSL uniform address space.
    pub fn uniform_align(self) -> u32 {
        match self {
            ShaderType::IVec1 | ShaderType::UVec1 | ShaderType::FVec1 => 4,
            ShaderType::IVec2 | ShaderType::UVec2 | ShaderType::FVec2 | ShaderType::Mat2x2 => 8,
            _ => 16,
        }
    }

    /// Size of this type in the WGSL uniform address space.
    ///
    /// `mat3x3` columns are padded to 16 bytes, hence 48 rather than 36.
    pub fn uniform_size(self) -> u32 {
        match self {
            ShaderType::IVec1 | ShaderType::UVec1 | ShaderType::FVec1 => 4,
            ShaderType::IVec2 | ShaderType::UVec2 | ShaderType::FVec2 => 8,
            ShaderType::IVec3 | ShaderType::UVec3 | ShaderType::FVec3 => 12,
            ShaderType::IVec4 | ShaderType::UVec4 | ShaderType::FVec4 => 16,
            ShaderType::Mat2x2 => 16,
            ShaderType::Mat3x3 => 48,
            ShaderType::Mat4x4 => 64,
        }
    }

    /// Is this a matrix type?
    pub fn is_matrix(self) -> bool {
        matches!(
            self,
            ShaderType::Mat2x2 | ShaderType::Mat3x3 | ShaderType::Mat4x4
        )
    }
}

/// A vertex attribute declared by a program.
#[derive(Clone, Debug)]
pub struct AttributeDecl {
    /// Attribute name, matched against [`AttributeBinding::name`].
    ///
    /// [`AttributeBinding::name`]: crate::scene::AttributeBinding
    pub name: String,
    /// Base `@location` in the WGSL vertex stage.
    pub location: u32,
    /// Shape of the attribute.
    pub ty: ShaderType,
}

/// A uniform declared inside a program's uniform block.
///
/// Byte offsets are computed from declaration order using WGSL uniform
/// layout rules; callers only name the member and its shape.
#[derive(Clone, Debug)]
pub struct UniformDecl {
    /// Member name, matched by [`SceneCache::set_uniform`].
    ///
    /// [`SceneCache::set_uniform`]: crate::scene::SceneCache::set_uniform
    pub name: String,
    /// Shape of the member.
    pub ty: ShaderType,
}

/// Everything needed to create a program.
///
/// The WGSL module must expose `vs_main`/`fs_main` entry points and declare
/// its uniform block at `@group(0) @binding(0)`, with members in the same
/// order as `uniforms`. The optional pick module follows the same contract
/// and must re-declare every shared attribute at the same location.
#[derive(Clone, Debug, Default)]
pub struct ProgramSpec {
    /// Debug label used for wgpu resources.
    pub label: Option<String>,
    /// WGSL source of the draw program.
    pub source: String,
    /// Attribute table of the draw program.
    pub attributes: Vec<AttributeDecl>,
    /// Uniform block members of the draw program, in declaration order.
    pub uniforms: Vec<UniformDecl>,
    /// WGSL source of the paired pick program, if picking is wanted.
    pub pick_source: Option<String>,
    /// Attribute table of the pick program (usually the shared subset plus `pickId`).
    pub pick_attributes: Vec<AttributeDecl>,
    /// Uniform block members of the pick program.
    pub pick_uniforms: Vec<UniformDecl>,
}

/// Name of the per-instance object-id attribute a pick program must declare.
pub const PICK_ID_ATTRIBUTE: &str = "pickId";

/// A resolved attribute: declaration plus nothing else, kept separate from
/// [`AttributeDecl`] so the two sides of the boundary can evolve apart.
#[derive(Clone, Debug)]
pub struct AttributeVar {
    /// Attribute name.
    pub name: String,
    /// Base shader location.
    pub location: u32,
    /// Shape.
    pub ty: ShaderType,
}

/// A resolved uniform block member.
#[derive(Clone, Debug)]
pub struct UniformVar {
    /// Member name.
    pub name: String,
    /// Shape.
    pub ty: ShaderType,
    /// Byte offset inside the uniform block.
    pub offset: u32,
}

/// The introspected interface of one program variant.
#[derive(Clone, Debug, Default)]
pub struct ProgramInterface {
    /// Attribute table.
    pub attributes: Vec<AttributeVar>,
    /// Uniform table with computed offsets.
    pub uniforms: Vec<UniformVar>,
    /// Total uniform block size, rounded up to 16 bytes.
    pub uniform_block_size: u32,
}

impl ProgramInterface {
    /// Builds an interface from declarations, laying out the uniform block.
    pub fn new(attributes: &[AttributeDecl], uniforms: &[UniformDecl]) -> ProgramInterface {
        let attributes = attributes
            .iter()
            .map(|a| AttributeVar {
                name: a.name.clone(),
                location: a.location,
                ty: a.ty,
            })
            .collect();

        let mut offset = 0u32;
        let mut vars = Vec::with_capacity(uniforms.len());
        for u in uniforms {
            let align = u.ty.uniform_align();
            offset = offset.div_ceil(align) * align;
            vars.push(UniformVar {
                name: u.name.clone(),
                ty: u.ty,
                offset,
            });
            offset += u.ty.uniform_size();
        }

        ProgramInterface {
            attributes,
            uniforms: vars,
            uniform_block_size: offset.div_ceil(16) * 16,
        }
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeVar> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks up a uniform block member by name.
    pub fn uniform(&self, name: &str) -> Option<&UniformVar> {
        self.uniforms.iter().find(|u| u.name == name)
    }
}

/// Checks that every attribute shared between a program and its pick variant
/// lives at the same location, so one vertex layout serves both passes.
pub(crate) fn validate_shared_locations(
    draw: &ProgramInterface,
    pick: &ProgramInterface,
) -> Result<()> {
    for a in &pick.attributes {
        if let Some(d) = draw.attribute(&a.name) {
            if d.location != a.location {
                return Err(Error::PickLocationMismatch {
                    name: a.name.clone(),
                    location: d.location,
                    pick_location: a.location,
                });
            }
        }
    }
    Ok(())
}

/// A uniform value accepted by [`SceneCache::set_uniform`].
///
/// Matrices are column-major.
///
/// [`SceneCache::set_uniform`]: crate::scene::SceneCache::set_uniform
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    /// `f32`
    Float(f32),
    /// `vec2<f32>`
    Vec2([f32; 2]),
    /// `vec3<f32>`
    Vec3([f32; 3]),
    /// `vec4<f32>`
    Vec4([f32; 4]),
    /// `i32`
    Int(i32),
    /// `vec2<i32>`
    IVec2([i32; 2]),
    /// `vec3<i32>`
    IVec3([i32; 3]),
    /// `vec4<i32>`
    IVec4([i32; 4]),
    /// `u32`
    UInt(u32),
    /// `mat2x2<f32>`, columns.
    Mat2([[f32; 2]; 2]),
    /// `mat3x3<f32>`, columns.
    Mat3([[f32; 3]; 3]),
    /// `mat4x4<f32>`, columns.
    Mat4([[f32; 4]; 4]),
}

impl From<glamx::Mat4> for UniformValue {
    fn from(m: glamx::Mat4) -> Self {
        UniformValue::Mat4(m.to_cols_array_2d())
    }
}

impl UniformValue {
    /// The shader type this value can be written to.
    pub fn shader_type(&self) -> ShaderType {
        match self {
            UniformValue::Float(_) => ShaderType::FVec1,
            UniformValue::Vec2(_) => ShaderType::FVec2,
            UniformValue::Vec3(_) => ShaderType::FVec3,
            UniformValue::Vec4(_) => ShaderType::FVec4,
            UniformValue::Int(_) => ShaderType::IVec1,
            UniformValue::IVec2(_) => ShaderType::IVec2,
            UniformValue::IVec3(_) => ShaderType::IVec3,
            UniformValue::IVec4(_) => ShaderType::IVec4,
            UniformValue::UInt(_) => ShaderType::UVec1,
            UniformValue::Mat2(_) => ShaderType::Mat2x2,
            UniformValue::Mat3(_) => ShaderType::Mat3x3,
            UniformValue::Mat4(_) => ShaderType::Mat4x4,
        }
    }

    /// Serializes the value with WGSL uniform layout (mat3 columns padded to
    /// 16 bytes).
    pub fn to_uniform_bytes(self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::IVec2(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::IVec3(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::IVec4(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::UInt(v) => bytemuck::bytes_of(&v).to_vec(),
            UniformValue::Mat2(cols) => bytemuck::bytes_of(&cols).to_vec(),
            UniformValue::Mat3(cols) => {
                let mut out = Vec::with_capacity(48);
                for col in &cols {
                    out.extend_from_slice(bytemuck::bytes_of(col));
                    out.extend_from_slice(&[0u8; 4]);
                }
                out
            }
            UniformValue::Mat4(cols) => bytemuck::bytes_of(&cols).to_vec(),
        }
    }

    /// Returns the transposed value for matrix shapes, `None` otherwise.
    pub fn transposed(self) -> Option<UniformValue> {
        fn t<const N: usize>(m: [[f32; N]; N]) -> [[f32; N]; N] {
            let mut out = m;
            for (i, row) in m.iter().enumerate() {
                for (j, v) in row.iter().enumerate() {
                    out[j][i] = *v;
                }
            }
            out
        }
        match self {
            UniformValue::Mat2(m) => Some(UniformValue::Mat2(t(m))),
            UniformValue::Mat3(m) => Some(UniformValue::Mat3(t(m))),
            UniformValue::Mat4(m) => Some(UniformValue::Mat4(t(m))),
            _ => None,
        }
    }
}

/// A uniform write waiting for its program to be bound.
#[derive(Clone, Debug)]
pub(crate) struct PendingUniform {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// GPU-side state of one program variant.
pub(crate) struct CompiledProgram {
    pub module: wgpu::ShaderModule,
    pub uniform_buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub pipeline_layout: wgpu::PipelineLayout,
}

impl CompiledProgram {
    fn new(
        ctxt: &Context,
        module: wgpu::ShaderModule,
        block_size: u32,
        label: Option<&str>,
    ) -> CompiledProgram {
        // Programs without uniforms still get a (zeroed) block so bind-group
        // wiring is identical for every pipeline.
        let size = u64::from(block_size.max(16));
        let uniform_buffer = ctxt.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = ctxt.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label,
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let bind_group = ctxt.create_bind_group(&wgpu::BindGroupDescriptor {
            label,
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = ctxt.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label,
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        CompiledProgram {
            module,
            uniform_buffer,
            bind_group,
            pipeline_layout,
        }
    }
}

/// A shader program registry entry: interface tables, compiled state and the
/// per-variant pending uniform queues.
pub struct ShaderProgram {
    pub(crate) interface: ProgramInterface,
    pub(crate) pick_interface: Option<ProgramInterface>,
    pub(crate) compiled: Option<CompiledProgram>,
    pub(crate) pick_compiled: Option<CompiledProgram>,
    pub(crate) pending: Vec<PendingUniform>,
    pub(crate) pick_pending: Vec<PendingUniform>,
}

impl ShaderProgram {
    /// Builds an entry from bare interfaces, with no GPU state attached.
    #[cfg(test)]
    pub(crate) fn from_interfaces(
        interface: ProgramInterface,
        pick_interface: Option<ProgramInterface>,
    ) -> ShaderProgram {
        ShaderProgram {
            interface,
            pick_interface,
            compiled: None,
            pick_compiled: None,
            pending: Vec::new(),
            pick_pending: Vec::new(),
        }
    }

    /// The draw interface of this program.
    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    /// The pick interface, if a pick variant exists.
    pub fn pick_interface(&self) -> Option<&ProgramInterface> {
        self.pick_interface.as_ref()
    }

    /// Queues a uniform write on the draw variant and, when the pick variant
    /// declares the same member, on the pick variant too.
    ///
    /// Unknown names are dropped; a shape mismatch is a warning, not an
    /// error, so one bad write cannot poison a whole frame.
    pub(crate) fn queue_uniform(&mut self, name: &str, value: &UniformValue) {
        let ty = value.shader_type();
        let mut known = false;

        if let Some(var) = self.interface.uniform(name) {
            known = true;
            if var.ty == ty {
                self.pending.push(PendingUniform {
                    offset: var.offset,
                    bytes: value.to_uniform_bytes(),
                });
            } else {
                log::warn!(
                    "uniform `{}` declared as {:?} but written as {:?}; write dropped",
                    name,
                    var.ty,
                    ty
                );
            }
        }

        if let Some(pick) = &self.pick_interface {
            if let Some(var) = pick.uniform(name) {
                known = true;
                if var.ty == ty {
                    self.pick_pending.push(PendingUniform {
                        offset: var.offset,
                        bytes: value.to_uniform_bytes(),
                    });
                }
            }
        }

        if !known {
            log::debug!("uniform `{}` not declared by this program", name);
        }
    }

    /// Flushes queued draw-variant writes into the uniform buffer.
    pub(crate) fn flush_pending(&mut self, ctxt: &Context) {
        if let Some(c) = &self.compiled {
            for p in self.pending.drain(..) {
                ctxt.write_buffer(&c.uniform_buffer, u64::from(p.offset), &p.bytes);
            }
        }
    }

    /// Flushes queued pick-variant writes into the pick uniform buffer.
    pub(crate) fn flush_pick_pending(&mut self, ctxt: &Context) {
        if let Some(c) = &self.pick_compiled {
            for p in self.pick_pending.drain(..) {
                ctxt.write_buffer(&c.uniform_buffer, u64::from(p.offset), &p.bytes);
            }
        }
    }
}

/// The program-compile service.
///
/// The cache treats compilation as an external collaborator: anything able
/// to turn a [`ProgramSpec`] into a [`ShaderProgram`] can be plugged in.
pub trait ProgramCompiler {
    /// Compiles, links and validates a program.
    fn compile(&self, ctxt: &Context, spec: &ProgramSpec) -> Result<ShaderProgram>;
}

/// The default compiler: builds one WGSL module per variant and captures
/// validation failures through a wgpu error scope.
#[derive(Default)]
pub struct WgslCompiler;

impl WgslCompiler {
    fn build_module(
        &self,
        ctxt: &Context,
        label: Option<&str>,
        source: &str,
    ) -> Result<wgpu::ShaderModule> {
        ctxt.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = ctxt.create_shader_module(label, source);

        #[cfg(not(target_arch = "wasm32"))]
        if let Some(err) = pollster::block_on(ctxt.device.pop_error_scope()) {
            return Err(Error::ShaderBuild(err.to_string()));
        }

        // On the web there is no way to block on the scope; validation
        // errors surface through the uncaptured-error handler instead.
        #[cfg(target_arch = "wasm32")]
        let _ = ctxt.device.pop_error_scope();

        Ok(module)
    }
}

impl ProgramCompiler for WgslCompiler {
    fn compile(&self, ctxt: &Context, spec: &ProgramSpec) -> Result<ShaderProgram> {
        let interface = ProgramInterface::new(&spec.attributes, &spec.uniforms);
        let pick_interface = spec
            .pick_source
            .as_ref()
            .map(|_| ProgramInterface::new(&spec.pick_attributes, &spec.pick_uniforms));

        if let Some(pick) = &pick_interface {
            validate_shared_locations(&interface, pick)?;
        }

        let label = spec.label.as_deref();
        let module = self.build_module(ctxt, label, &spec.source)?;
        let compiled = CompiledProgram::new(ctxt, module, interface.uniform_block_size, label);

        let pick_compiled = match (&spec.pick_source, &pick_interface) {
            (Some(src), Some(pick)) => {
                let module = self.build_module(ctxt, label, src)?;
                Some(CompiledProgram::new(
                    ctxt,
                    module,
                    pick.uniform_block_size,
                    label,
                ))
            }
            _ => None,
        };

        Ok(ShaderProgram {
            interface,
            pick_interface,
            compiled: Some(compiled),
            pick_compiled,
            pending: Vec::new(),
            pick_pending: Vec::new(),
        })
    }
}
