//! The owning scene cache: every registry, the invalidation plumbing between
//! them, and the render/pick entry points.

use std::collections::{BTreeSet, HashMap};

use glamx::Mat4;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::procedural;
use crate::renderer::{self, PassKind, RenderContext};
use crate::resource::{
    BufferTarget, DataType, DeviceBuffer, PickTarget, ProgramCompiler, ProgramSpec, ShaderProgram,
    UniformValue, WgslCompiler,
};
use crate::scene::attribute::{AttributeBinding, Primitive};
use crate::scene::group::GroupInfo;
use crate::scene::object::{
    resolve_attributes, IndexBinding, ObjectDesc, ObjectFlags, ObjectInfo,
};
use crate::scene::optimizer::build_group_layout;

/// Resolution the cached sphere geometry is generated at.
const SPHERE_VERTICES: u32 = 300;
/// Spokes for cached cylinders, cones and disks.
const CYLINDER_SPOKES: u32 = 50;
const CONE_SPOKES: u32 = 50;
const DISK_SPOKES: u32 = 50;

/// Cached geometry for one primitive shape resolution.
#[derive(Clone, Copy, Debug)]
struct PrimitiveInfo {
    data_id: i32,
    index_id: i32,
    index_count: u32,
    index_type: DataType,
    primitive: Primitive,
}

/// The retained-mode scene cache.
///
/// Owns every registry (buffers, programs, matrices, objects, groups) and
/// the offscreen pick target. One `SceneCache` is one independent rendering
/// session; nothing is shared through globals, so several caches can coexist
/// against different devices.
pub struct SceneCache {
    compiler: Box<dyn ProgramCompiler>,

    pub(crate) buffers: HashMap<i32, DeviceBuffer>,
    pub(crate) programs: HashMap<i32, ShaderProgram>,
    /// matrix id -> id of the singleton buffer holding its values. The
    /// buffer id is allocated once per matrix id and survives re-creation.
    matrices: HashMap<i32, i32>,
    pub(crate) objects: HashMap<i32, ObjectInfo>,
    pub(crate) groups: HashMap<i32, GroupInfo>,
    /// Non-owning index: object id -> groups referencing it. Used only to
    /// invalidate cached layouts; maintained on membership edits.
    object_groups: HashMap<i32, BTreeSet<i32>>,

    /// Attribute-name remapping applied when objects are created.
    aliases: HashMap<String, String>,

    /// Strictly-decreasing counter for internally synthesized buffer ids,
    /// guaranteed to never collide with caller-chosen (positive) ids.
    internal_buffer_id: i32,

    proto_spheres: HashMap<u32, PrimitiveInfo>,
    proto_cylinders: HashMap<u32, PrimitiveInfo>,
    proto_cones: HashMap<u32, PrimitiveInfo>,
    proto_disks: HashMap<u32, PrimitiveInfo>,

    viewport: (u32, u32),
    clear_color: wgpu::Color,
    pick_target: Option<PickTarget>,
}

fn ensure_positive(kind: &'static str, id: i32) -> Result<()> {
    if id <= 0 {
        return Err(Error::InvalidId { kind, id });
    }
    Ok(())
}

fn identity_singleton() -> DeviceBuffer {
    DeviceBuffer::singleton(bytemuck::cast_slice(&Mat4::IDENTITY.to_cols_array()).to_vec())
}

impl SceneCache {
    /// Creates an empty cache using the default WGSL program compiler.
    pub fn new() -> SceneCache {
        SceneCache::with_compiler(Box::new(WgslCompiler))
    }

    /// Creates an empty cache with a custom program-compile service.
    pub fn with_compiler(compiler: Box<dyn ProgramCompiler>) -> SceneCache {
        let mut buffers = HashMap::new();
        // Buffer zero permanently holds the identity matrix.
        buffers.insert(0, identity_singleton());

        SceneCache {
            compiler,
            buffers,
            programs: HashMap::new(),
            matrices: HashMap::new(),
            objects: HashMap::new(),
            groups: HashMap::new(),
            object_groups: HashMap::new(),
            aliases: HashMap::new(),
            internal_buffer_id: 0,
            proto_spheres: HashMap::new(),
            proto_cylinders: HashMap::new(),
            proto_cones: HashMap::new(),
            proto_disks: HashMap::new(),
            viewport: (0, 0),
            clear_color: wgpu::Color::BLACK,
            pick_target: None,
        }
    }

    /// Sets the viewport size, in pixels. The pick target is reallocated on
    /// the next pick after a size change.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    /// Sets the color the draw pass clears to.
    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }

    fn next_internal_id(&mut self) -> i32 {
        self.internal_buffer_id -= 1;
        self.internal_buffer_id
    }

    // ----------------------------------------------------------------------
    // Invalidation plumbing.

    /// Invalidates the cached layout of every group referencing `object_id`.
    fn invalidate_groups_of(&mut self, object_id: i32) {
        if let Some(gids) = self.object_groups.get(&object_id) {
            for gid in gids {
                if let Some(group) = self.groups.get_mut(gid) {
                    group.invalidate();
                }
            }
        }
    }

    /// Reacts to a buffer being replaced or deleted: objects referencing it
    /// get re-optimized (and, on deletion, become incomplete).
    fn touch_buffer_users(&mut self, data_id: i32, mark_incomplete: bool) {
        let users: Vec<i32> = self
            .objects
            .iter()
            .filter(|(_, oi)| oi.references_buffer(data_id))
            .map(|(id, _)| *id)
            .collect();
        for id in users {
            if mark_incomplete {
                if let Some(oi) = self.objects.get_mut(&id) {
                    oi.flags |= ObjectFlags::INCOMPLETE;
                }
            }
            self.invalidate_groups_of(id);
        }
    }

    // ----------------------------------------------------------------------
    // Buffers.

    /// Creates (or replaces) a buffer from raw bytes.
    pub fn create_buffer(&mut self, id: i32, target: BufferTarget, data: &[u8]) -> Result<()> {
        ensure_positive("buffer", id)?;
        self.insert_buffer(id, DeviceBuffer::from_data(target, data.to_vec()));
        Ok(())
    }

    /// Creates (or replaces) a singleton buffer: one constant value kept
    /// re-readable on the CPU so it can be interleaved into instance data.
    pub fn create_singleton(&mut self, id: i32, data: &[u8]) -> Result<()> {
        ensure_positive("buffer", id)?;
        self.insert_buffer(id, DeviceBuffer::singleton(data.to_vec()));
        Ok(())
    }

    fn insert_buffer(&mut self, id: i32, buffer: DeviceBuffer) {
        let replaced = self.buffers.insert(id, buffer).is_some();
        if replaced {
            // Same id, new contents: groups embedding the old value must
            // rebuild, but the objects stay complete.
            self.touch_buffer_users(id, false);
        }
    }

    /// Deletes a buffer. Objects still referencing it become incomplete and
    /// are skipped at render time; this tolerates out-of-order teardown.
    pub fn delete_buffer(&mut self, id: i32) {
        if id == 0 {
            // Reserved for the identity matrix.
            return;
        }
        if self.buffers.remove(&id).is_some() {
            self.touch_buffer_users(id, true);
        }
    }

    /// Releases every buffer, cascading to the derived matrices and the
    /// generated primitive caches; re-seeds the identity buffer.
    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
        self.buffers.insert(0, identity_singleton());
        self.matrices.clear();
        self.proto_spheres.clear();
        self.proto_cylinders.clear();
        self.proto_cones.clear();
        self.proto_disks.clear();

        for oi in self.objects.values_mut() {
            if !oi.arrays.is_empty() || !oi.singletons.is_empty() || oi.index.is_some() {
                oi.flags |= ObjectFlags::INCOMPLETE;
            }
        }
        for group in self.groups.values_mut() {
            group.invalidate();
        }
    }

    // ----------------------------------------------------------------------
    // Programs.

    /// Compiles and registers a program, replacing any prior program at this
    /// id. A failed build leaves the registry untouched.
    pub fn create_program(&mut self, ctxt: &Context, id: i32, spec: &ProgramSpec) -> Result<()> {
        ensure_positive("program", id)?;
        let program = self.compiler.compile(ctxt, spec)?;
        self.programs.insert(id, program);
        Ok(())
    }

    /// Deletes a program. Objects using it are skipped at render time.
    pub fn delete_program(&mut self, id: i32) {
        self.programs.remove(&id);
    }

    /// Releases every program.
    pub fn clear_programs(&mut self) {
        self.programs.clear();
    }

    /// Queues a uniform write, flushed when the program is next bound.
    ///
    /// `program_id` 0 broadcasts the write to every registered program (and
    /// pick variant) declaring the member.
    pub fn set_uniform(&mut self, program_id: i32, name: &str, value: &UniformValue) -> Result<()> {
        if program_id < 0 {
            return Err(Error::InvalidId {
                kind: "program",
                id: program_id,
            });
        }
        if program_id == 0 {
            for program in self.programs.values_mut() {
                program.queue_uniform(name, value);
            }
        } else if let Some(program) = self.programs.get_mut(&program_id) {
            program.queue_uniform(name, value);
        } else {
            log::debug!("set_uniform: unknown program {}", program_id);
        }
        Ok(())
    }

    /// Queues a matrix uniform write, optionally transposing it first.
    ///
    /// Non-matrix values are dropped with a warning.
    pub fn set_uniform_matrix(
        &mut self,
        program_id: i32,
        name: &str,
        transpose: bool,
        value: &UniformValue,
    ) -> Result<()> {
        if !value.shader_type().is_matrix() {
            log::warn!("set_uniform_matrix: `{}` is not a matrix value", name);
            return Ok(());
        }
        let value = if transpose {
            value.transposed().unwrap_or(*value)
        } else {
            *value
        };
        self.set_uniform(program_id, name, &value)
    }

    // ----------------------------------------------------------------------
    // Matrices.

    /// Creates (or replaces) a transform matrix.
    ///
    /// Replacing reuses the matrix's underlying singleton buffer id, so
    /// objects referencing the matrix observe the new values without being
    /// re-registered (their groups re-optimize on next use).
    pub fn create_matrix(&mut self, id: i32, matrix: &Mat4) -> Result<()> {
        if id == 0 {
            return Err(Error::ReservedMatrixId);
        }
        ensure_positive("matrix", id)?;

        let data_id = match self.matrices.get(&id) {
            Some(data_id) => *data_id,
            None => {
                let data_id = self.next_internal_id();
                self.matrices.insert(id, data_id);
                data_id
            }
        };
        let bytes = bytemuck::cast_slice(&matrix.to_cols_array()).to_vec();
        self.insert_buffer(data_id, DeviceBuffer::singleton(bytes));
        Ok(())
    }

    /// Deletes a matrix and its backing buffer. Matrix 0 (the identity) is
    /// never deleted.
    pub fn delete_matrix(&mut self, id: i32) {
        if id == 0 {
            log::warn!("matrix id 0 is reserved and cannot be deleted");
            return;
        }
        if let Some(data_id) = self.matrices.remove(&id) {
            if self.buffers.remove(&data_id).is_some() {
                self.touch_buffer_users(data_id, true);
            }
        }
    }

    /// Deletes every matrix (the identity stays).
    pub fn clear_matrices(&mut self) {
        let ids: Vec<i32> = self.matrices.keys().copied().collect();
        for id in ids {
            self.delete_matrix(id);
        }
    }

    // ----------------------------------------------------------------------
    // Objects.

    /// Remaps attribute names at object-creation time. An empty or identical
    /// alias removes the mapping.
    pub fn set_attribute_alias(&mut self, name: &str, alias: &str) {
        if alias.is_empty() || alias == name {
            self.aliases.remove(name);
        } else {
            self.aliases.insert(name.to_string(), alias.to_string());
        }
    }

    fn alias(&self, name: &str) -> String {
        match self.aliases.get(name) {
            Some(alias) => alias.clone(),
            None => name.to_string(),
        }
    }

    /// Registers (or replaces) a draw object.
    ///
    /// The matrix is attached as an implicit `instanceTransform` singleton
    /// binding. An object missing resources (program attributes without a
    /// binding, bindings without a buffer, an unknown program) is created
    /// incomplete: it stays registered but is skipped by traversals.
    pub fn create_object(&mut self, id: i32, desc: ObjectDesc) -> Result<()> {
        ensure_positive("object", id)?;
        ensure_positive("program", desc.program_id)?;
        if let Some(ib) = desc.index {
            if ib.data_type.index_format().is_none() {
                return Err(Error::UnsupportedIndexType(ib.data_type));
            }
        }

        let mut bindings = Vec::with_capacity(desc.attributes.len() + 1);
        for binding in &desc.attributes {
            binding.validate_alignment()?;
            bindings.push(AttributeBinding {
                name: self.alias(&binding.name),
                ..binding.clone()
            });
        }

        let matrix_data_id = if desc.matrix_id == 0 {
            Some(0)
        } else {
            self.matrices.get(&desc.matrix_id).copied()
        };
        match matrix_data_id {
            Some(data_id) => bindings.push(AttributeBinding::new(
                "instanceTransform",
                data_id,
                0,
                0,
                16,
                DataType::Float,
            )),
            None => log::warn!("object {}: unknown matrix {}", id, desc.matrix_id),
        }

        self.delete_object(id);

        let (arrays, singletons, flags) = match self.programs.get(&desc.program_id) {
            Some(program) => {
                let (arrays, singletons, incomplete) = resolve_attributes(
                    id,
                    &bindings,
                    program.interface(),
                    program.pick_interface(),
                    &self.buffers,
                );
                let flags = if incomplete {
                    ObjectFlags::INCOMPLETE
                } else {
                    ObjectFlags::empty()
                };
                (arrays, singletons, flags)
            }
            None => {
                log::warn!("missing program {} for object {}", desc.program_id, id);
                (Vec::new(), Vec::new(), ObjectFlags::INCOMPLETE)
            }
        };

        self.objects.insert(
            id,
            ObjectInfo {
                program_id: desc.program_id,
                matrix_id: desc.matrix_id,
                arrays,
                singletons,
                primitive: desc.primitive,
                first: desc.first,
                count: desc.count,
                index: desc.index,
                flags,
            },
        );
        // Groups already listing this id pick up the re-created object.
        self.invalidate_groups_of(id);
        Ok(())
    }

    /// Deletes an object. Groups keep the id in their member set (it is
    /// skipped while unknown, and rejoins if re-created) but re-optimize.
    pub fn delete_object(&mut self, id: i32) {
        if self.objects.remove(&id).is_some() {
            self.invalidate_groups_of(id);
        }
    }

    /// Deletes every object, cascading to groups (which hold object
    /// references).
    pub fn clear_objects(&mut self) {
        self.objects.clear();
        self.clear_groups(false);
    }

    fn set_object_flag(&mut self, ids: &[i32], flag: ObjectFlags, on: bool) {
        for &id in ids {
            let changed = match self.objects.get_mut(&id) {
                Some(oi) if oi.flags.contains(flag) != on => {
                    oi.flags.set(flag, on);
                    true
                }
                _ => false,
            };
            if changed {
                self.invalidate_groups_of(id);
            }
        }
    }

    /// Hides objects: they stay registered but are skipped by traversals.
    pub fn hide_objects(&mut self, ids: &[i32]) {
        self.set_object_flag(ids, ObjectFlags::HIDDEN, true);
    }

    /// Shows previously hidden objects.
    pub fn show_objects(&mut self, ids: &[i32]) {
        self.set_object_flag(ids, ObjectFlags::HIDDEN, false);
    }

    /// Flags objects as transparent. Transparent objects are partitioned
    /// apart from opaque ones.
    pub fn set_transparent(&mut self, ids: &[i32]) {
        self.set_object_flag(ids, ObjectFlags::TRANSPARENT, true);
    }

    /// Flags objects as opaque.
    pub fn set_opaque(&mut self, ids: &[i32]) {
        self.set_object_flag(ids, ObjectFlags::TRANSPARENT, false);
    }

    /// Looks up an object.
    pub fn object(&self, id: i32) -> Option<&ObjectInfo> {
        self.objects.get(&id)
    }

    // ----------------------------------------------------------------------
    // Groups.

    /// Creates a group, or empties it if it already exists.
    pub fn create_group(&mut self, id: i32) -> Result<()> {
        ensure_positive("group", id)?;
        if let Some(group) = self.groups.get_mut(&id) {
            let members: Vec<i32> = group.objects().collect();
            group.clear();
            self.unindex_members(id, &members);
        } else {
            self.groups.insert(id, GroupInfo::new());
        }
        Ok(())
    }

    /// Deletes a group; with `and_objects`, its member objects too.
    pub fn delete_group(&mut self, id: i32, and_objects: bool) {
        let Some(group) = self.groups.remove(&id) else {
            return;
        };
        let members: Vec<i32> = group.objects().collect();
        self.unindex_members(id, &members);
        if and_objects {
            for member in members {
                self.delete_object(member);
            }
        }
    }

    /// Deletes every group; with `and_objects`, their members too.
    pub fn clear_groups(&mut self, and_objects: bool) {
        let ids: Vec<i32> = self.groups.keys().copied().collect();
        for id in ids {
            self.delete_group(id, and_objects);
        }
    }

    fn unindex_members(&mut self, group_id: i32, members: &[i32]) {
        for member in members {
            if let Some(set) = self.object_groups.get_mut(member) {
                set.remove(&group_id);
                if set.is_empty() {
                    self.object_groups.remove(member);
                }
            }
        }
    }

    /// Adds objects to a group. Unknown group ids are a no-op.
    pub fn group_add(&mut self, group_id: i32, ids: &[i32]) {
        let Some(group) = self.groups.get_mut(&group_id) else {
            log::warn!("group_add: unknown group {}", group_id);
            return;
        };
        group.add(ids);
        for id in ids {
            self.object_groups.entry(*id).or_default().insert(group_id);
        }
    }

    /// Removes objects from a group.
    pub fn group_remove(&mut self, group_id: i32, ids: &[i32]) {
        let Some(group) = self.groups.get_mut(&group_id) else {
            log::warn!("group_remove: unknown group {}", group_id);
            return;
        };
        group.remove(ids);
        self.unindex_members(group_id, ids);
    }

    /// Hides every object of a group.
    pub fn hide_group(&mut self, group_id: i32) {
        if let Some(group) = self.groups.get(&group_id) {
            let members: Vec<i32> = group.objects().collect();
            self.hide_objects(&members);
        }
    }

    /// Shows every object of a group.
    pub fn show_group(&mut self, group_id: i32) {
        if let Some(group) = self.groups.get(&group_id) {
            let members: Vec<i32> = group.objects().collect();
            self.show_objects(&members);
        }
    }

    /// Looks up a group.
    pub fn group(&self, id: i32) -> Option<&GroupInfo> {
        self.groups.get(&id)
    }

    /// Optimizes a group now instead of at its next draw. A no-op when the
    /// group is unknown or its layout is still valid.
    pub fn optimize_group(&mut self, group_id: i32) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            if group.layout.is_none() {
                group.layout = Some(build_group_layout(
                    &group.objects,
                    &self.objects,
                    &self.programs,
                    &self.buffers,
                ));
            }
        }
    }

    // ----------------------------------------------------------------------
    // Primitive shapes.

    fn upload_primitive(&mut self, mesh: procedural::PrimitiveMesh) -> PrimitiveInfo {
        let data_id = self.next_internal_id();
        let index_id = self.next_internal_id();
        self.buffers.insert(
            data_id,
            DeviceBuffer::from_data(
                BufferTarget::Array,
                bytemuck::cast_slice(&mesh.vertices).to_vec(),
            ),
        );
        self.buffers.insert(
            index_id,
            DeviceBuffer::from_data(BufferTarget::ElementArray, mesh.indices.bytes()),
        );
        PrimitiveInfo {
            data_id,
            index_id,
            index_count: mesh.indices.len(),
            index_type: mesh.indices.data_type(),
            primitive: mesh.primitive,
        }
    }

    fn scale_singleton(&mut self, scale: [f32; 3]) -> i32 {
        let id = self.next_internal_id();
        self.buffers
            .insert(id, DeviceBuffer::singleton(bytemuck::cast_slice(&scale).to_vec()));
        id
    }

    fn primitive_object(
        &mut self,
        object_id: i32,
        info: PrimitiveInfo,
        program_id: i32,
        matrix_id: i32,
        mut attributes: Vec<AttributeBinding>,
        scale: [f32; 3],
    ) -> Result<()> {
        attributes.push(AttributeBinding::new(
            "normal",
            info.data_id,
            0,
            24,
            3,
            DataType::Float,
        ));
        attributes.push(AttributeBinding::new(
            "position",
            info.data_id,
            12,
            24,
            3,
            DataType::Float,
        ));
        let scale_id = self.scale_singleton(scale);
        attributes.push(AttributeBinding::new(
            "instanceScale",
            scale_id,
            0,
            0,
            3,
            DataType::Float,
        ));
        self.create_object(
            object_id,
            ObjectDesc {
                program_id,
                matrix_id,
                attributes,
                primitive: info.primitive,
                first: 0,
                count: info.index_count,
                index: Some(IndexBinding {
                    data_id: info.index_id,
                    data_type: info.index_type,
                }),
            },
        )
    }

    /// Creates a sphere object from the cached unit-sphere geometry.
    pub fn add_sphere(
        &mut self,
        object_id: i32,
        radius: f32,
        program_id: i32,
        matrix_id: i32,
        attributes: Vec<AttributeBinding>,
    ) -> Result<()> {
        let info = match self.proto_spheres.get(&SPHERE_VERTICES) {
            Some(info) => *info,
            None => {
                let info = self.upload_primitive(procedural::sphere(SPHERE_VERTICES));
                self.proto_spheres.insert(SPHERE_VERTICES, info);
                info
            }
        };
        self.primitive_object(
            object_id,
            info,
            program_id,
            matrix_id,
            attributes,
            [radius, radius, radius],
        )
    }

    /// Creates a cylinder object from the cached unit-cylinder geometry.
    pub fn add_cylinder(
        &mut self,
        object_id: i32,
        radius: f32,
        length: f32,
        program_id: i32,
        matrix_id: i32,
        attributes: Vec<AttributeBinding>,
    ) -> Result<()> {
        let info = match self.proto_cylinders.get(&CYLINDER_SPOKES) {
            Some(info) => *info,
            None => {
                let info = self.upload_primitive(procedural::cylinder(CYLINDER_SPOKES));
                self.proto_cylinders.insert(CYLINDER_SPOKES, info);
                info
            }
        };
        self.primitive_object(
            object_id,
            info,
            program_id,
            matrix_id,
            attributes,
            [radius, length / 2.0, radius],
        )
    }

    /// Creates a cone object from the cached unit-cone geometry.
    pub fn add_cone(
        &mut self,
        object_id: i32,
        radius: f32,
        length: f32,
        program_id: i32,
        matrix_id: i32,
        attributes: Vec<AttributeBinding>,
    ) -> Result<()> {
        let info = match self.proto_cones.get(&CONE_SPOKES) {
            Some(info) => *info,
            None => {
                let info = self.upload_primitive(procedural::cone(CONE_SPOKES));
                self.proto_cones.insert(CONE_SPOKES, info);
                info
            }
        };
        self.primitive_object(
            object_id,
            info,
            program_id,
            matrix_id,
            attributes,
            [radius, length / 2.0, radius],
        )
    }

    /// Creates a disk object facing +Y from the cached unit-disk geometry.
    // TODO: honor inner_radius by generating an annulus instead of a disk.
    pub fn add_disk(
        &mut self,
        object_id: i32,
        _inner_radius: f32,
        outer_radius: f32,
        program_id: i32,
        matrix_id: i32,
        mut attributes: Vec<AttributeBinding>,
    ) -> Result<()> {
        let info = match self.proto_disks.get(&DISK_SPOKES) {
            Some(info) => *info,
            None => {
                let info = self.upload_primitive(procedural::disk(DISK_SPOKES));
                self.proto_disks.insert(DISK_SPOKES, info);
                info
            }
        };

        // The disk is flat: positions only, with a constant up normal.
        let normal_id = self.next_internal_id();
        self.buffers.insert(
            normal_id,
            DeviceBuffer::singleton(bytemuck::cast_slice(&[0.0f32, 1.0, 0.0]).to_vec()),
        );
        attributes.push(AttributeBinding::new(
            "normal",
            normal_id,
            0,
            0,
            3,
            DataType::Float,
        ));
        attributes.push(AttributeBinding::new(
            "position",
            info.data_id,
            0,
            0,
            3,
            DataType::Float,
        ));
        let scale_id = self.scale_singleton([outer_radius, 1.0, outer_radius]);
        attributes.push(AttributeBinding::new(
            "instanceScale",
            scale_id,
            0,
            0,
            3,
            DataType::Float,
        ));
        self.create_object(
            object_id,
            ObjectDesc {
                program_id,
                matrix_id,
                attributes,
                primitive: info.primitive,
                first: 0,
                count: info.index_count,
                index: Some(IndexBinding {
                    data_id: info.index_id,
                    data_type: info.index_type,
                }),
            },
        )
    }

    /// Releases the cached primitive geometry buffers.
    pub fn clear_primitives(&mut self) {
        let infos: Vec<PrimitiveInfo> = self
            .proto_spheres
            .drain()
            .chain(self.proto_cylinders.drain())
            .chain(self.proto_cones.drain())
            .chain(self.proto_disks.drain())
            .map(|(_, info)| info)
            .collect();
        for info in infos {
            if self.buffers.remove(&info.data_id).is_some() {
                self.touch_buffer_users(info.data_id, true);
            }
            if self.buffers.remove(&info.index_id).is_some() {
                self.touch_buffer_users(info.index_id, true);
            }
        }
    }

    /// Resets the whole session: objects (and groups), buffers (and
    /// matrices, primitives), programs.
    pub fn clear_all(&mut self) {
        self.clear_objects();
        self.clear_buffers();
        self.clear_programs();
    }

    // ----------------------------------------------------------------------
    // Draw entry points.

    /// Renders the listed groups into the frame's attachments.
    ///
    /// Unknown and empty group ids are skipped. Invalidated groups are
    /// re-optimized before the pass begins; the pass clears color and depth
    /// and draws every group's batches in order.
    pub fn render(&mut self, group_ids: &[i32], rc: &mut RenderContext<'_>) {
        let ctxt = rc.ctxt;
        renderer::prepare(
            ctxt,
            PassKind::Draw,
            group_ids,
            &mut self.groups,
            &self.objects,
            &mut self.programs,
            &mut self.buffers,
        );

        let mut pass = rc.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("batch3d_draw_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: rc.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear_color),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: rc.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        renderer::encode(
            PassKind::Draw,
            &mut pass,
            group_ids,
            &self.groups,
            &self.objects,
            &self.programs,
            &self.buffers,
        );
    }

    /// Renders the listed groups into the offscreen pick target and returns
    /// the object id drawn at `(x, y)`, or 0 for no hit.
    ///
    /// Coordinates are in pixels with the origin at the top left of the
    /// viewport. The pick target is lazily allocated at the viewport size
    /// and reused until [`SceneCache::set_viewport`] changes it. This call
    /// performs a synchronous GPU read-back.
    pub fn pick(&mut self, ctxt: &Context, group_ids: &[i32], x: u32, y: u32) -> i32 {
        let (width, height) = self.viewport;
        let stale = self
            .pick_target
            .as_ref()
            .is_none_or(|t| !t.matches(width, height));
        if stale {
            self.pick_target = PickTarget::new(ctxt, width, height);
        }
        let Some(target) = self.pick_target.take() else {
            log::warn!("no pick target for a {}x{} viewport", width, height);
            return 0;
        };

        renderer::prepare(
            ctxt,
            PassKind::Pick,
            group_ids,
            &mut self.groups,
            &self.objects,
            &mut self.programs,
            &mut self.buffers,
        );

        let mut encoder = ctxt.create_command_encoder(Some("batch3d_pick_encoder"));
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("batch3d_pick_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color_view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        // Transparent black decodes to "no hit".
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: target.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            renderer::encode(
                PassKind::Pick,
                &mut pass,
                group_ids,
                &self.groups,
                &self.objects,
                &self.programs,
                &self.buffers,
            );
        }
        ctxt.submit(std::iter::once(encoder.finish()));

        let id = target.read_id_at(ctxt, x, y);
        self.pick_target = Some(target);
        id as i32
    }
}

impl Default for SceneCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{AttributeDecl, ProgramInterface, ShaderType};

    const PROGRAM: i32 = 1;
    const POSITIONS: i32 = 100;
    const RED: i32 = 101;
    const BLUE: i32 = 102;
    const GROUP: i32 = 7;

    fn decl(name: &str, location: u32, ty: ShaderType) -> AttributeDecl {
        AttributeDecl {
            name: name.to_string(),
            location,
            ty,
        }
    }

    /// A cache with one registered program, no GPU behind it.
    fn cache() -> SceneCache {
        let mut cache = SceneCache::new();
        let interface = ProgramInterface::new(
            &[
                decl("position", 0, ShaderType::FVec3),
                decl("color", 1, ShaderType::FVec4),
                decl("instanceTransform", 2, ShaderType::Mat4x4),
            ],
            &[],
        );
        cache
            .programs
            .insert(PROGRAM, ShaderProgram::from_interfaces(interface, None));
        cache
            .create_buffer(POSITIONS, BufferTarget::Array, &[0u8; 30 * 12])
            .unwrap();
        cache
            .create_singleton(RED, bytemuck::cast_slice(&[1.0f32, 0.0, 0.0, 1.0]))
            .unwrap();
        cache
            .create_singleton(BLUE, bytemuck::cast_slice(&[0.0f32, 0.0, 1.0, 1.0]))
            .unwrap();
        cache
    }

    fn triangles(color_buffer: i32) -> ObjectDesc {
        ObjectDesc {
            program_id: PROGRAM,
            matrix_id: 0,
            attributes: vec![
                AttributeBinding::new("position", POSITIONS, 0, 0, 3, DataType::Float),
                AttributeBinding::new("color", color_buffer, 0, 0, 4, DataType::Float),
            ],
            primitive: Primitive::Triangles,
            first: 0,
            count: 30,
            index: None,
        }
    }

    fn red_blue_group(cache: &mut SceneCache) {
        cache.create_object(1, triangles(RED)).unwrap();
        cache.create_object(2, triangles(BLUE)).unwrap();
        cache.create_group(GROUP).unwrap();
        cache.group_add(GROUP, &[1, 2]);
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let mut cache = SceneCache::new();
        assert!(matches!(
            cache.create_buffer(0, BufferTarget::Array, &[]),
            Err(Error::InvalidId { kind: "buffer", .. })
        ));
        assert!(matches!(
            cache.create_group(-3),
            Err(Error::InvalidId { kind: "group", .. })
        ));
        assert!(matches!(
            cache.create_matrix(0, &Mat4::IDENTITY),
            Err(Error::ReservedMatrixId)
        ));
        assert!(matches!(
            cache.create_object(0, triangles(RED)),
            Err(Error::InvalidId { kind: "object", .. })
        ));
    }

    #[test]
    fn buffer_zero_is_the_identity_and_survives() {
        let cache = SceneCache::new();
        let identity = cache.buffers.get(&0).unwrap();
        assert!(identity.is_singleton());
        let m: &[f32] = bytemuck::cast_slice(identity.data().unwrap());
        assert_eq!(m, &Mat4::IDENTITY.to_cols_array());

        let mut cache = cache;
        cache.delete_buffer(0);
        assert!(cache.buffers.contains_key(&0));
        cache.clear_buffers();
        assert!(cache.buffers.contains_key(&0));
    }

    #[test]
    fn two_equal_objects_optimize_into_one_instanced_batch() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.optimize_group(GROUP);

        let layout = cache.groups[&GROUP].layout.as_ref().unwrap();
        assert_eq!(layout.batches.len(), 1);
        assert_eq!(layout.batches[0].instance_count, 2);
    }

    #[test]
    fn hiding_a_member_invalidates_and_reoptimizes() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.optimize_group(GROUP);
        assert!(cache.groups[&GROUP].is_optimized());

        cache.hide_objects(&[1]);
        assert!(!cache.groups[&GROUP].is_optimized());

        cache.optimize_group(GROUP);
        let layout = cache.groups[&GROUP].layout.as_ref().unwrap();
        assert_eq!(layout.batches[0].instance_count, 1);

        // Showing it again restores the pair.
        cache.show_objects(&[1]);
        cache.optimize_group(GROUP);
        let layout = cache.groups[&GROUP].layout.as_ref().unwrap();
        assert_eq!(layout.batches[0].instance_count, 2);
    }

    #[test]
    fn transparency_toggles_invalidate() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.optimize_group(GROUP);

        cache.set_transparent(&[2]);
        assert!(!cache.groups[&GROUP].is_optimized());
        cache.optimize_group(GROUP);
        assert_eq!(cache.groups[&GROUP].layout.as_ref().unwrap().batches.len(), 2);

        // A redundant toggle is not a mutation.
        cache.set_transparent(&[2]);
        assert!(cache.groups[&GROUP].is_optimized());
    }

    #[test]
    fn deleting_a_referenced_buffer_marks_objects_incomplete() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.optimize_group(GROUP);

        // Delete the buffer backing object 1's color singleton.
        cache.delete_buffer(RED);
        assert!(cache.object(1).unwrap().incomplete());
        assert!(!cache.object(2).unwrap().incomplete());
        assert!(!cache.groups[&GROUP].is_optimized());

        // Only the intact object is drawn afterwards.
        cache.optimize_group(GROUP);
        let layout = cache.groups[&GROUP].layout.as_ref().unwrap();
        assert_eq!(layout.batches.len(), 1);
        assert_eq!(layout.batches[0].instance_count, 1);
    }

    #[test]
    fn matrix_recreation_reuses_storage_and_propagates() {
        let mut cache = cache();
        cache.create_matrix(5, &Mat4::IDENTITY).unwrap();
        let data_id = cache.matrices[&5];

        let mut desc = triangles(RED);
        desc.matrix_id = 5;
        cache.create_object(1, desc).unwrap();
        cache.create_group(GROUP).unwrap();
        cache.group_add(GROUP, &[1]);
        cache.optimize_group(GROUP);

        let translated = Mat4::from_cols_array_2d(&[
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [3.0, 4.0, 5.0, 1.0],
        ]);
        cache.create_matrix(5, &translated).unwrap();

        // Same backing buffer, new values, invalidated layout.
        assert_eq!(cache.matrices[&5], data_id);
        assert!(!cache.groups[&GROUP].is_optimized());
        assert!(!cache.object(1).unwrap().incomplete());

        cache.optimize_group(GROUP);
        let layout = cache.groups[&GROUP].layout.as_ref().unwrap();
        // color (16 bytes) then the transform: the new column lands in the
        // instance image without the object being re-registered.
        let image = layout.buffers[0].data().unwrap();
        let m: &[f32] = bytemuck::cast_slice(&image[16..80]);
        assert_eq!(m, &translated.to_cols_array());
    }

    #[test]
    fn deleting_a_matrix_orphans_its_users() {
        let mut cache = cache();
        cache.create_matrix(5, &Mat4::IDENTITY).unwrap();
        let mut desc = triangles(RED);
        desc.matrix_id = 5;
        cache.create_object(1, desc).unwrap();

        cache.delete_matrix(5);
        assert!(cache.object(1).unwrap().incomplete());
        // The identity can never go away.
        cache.delete_matrix(0);
        assert!(cache.buffers.contains_key(&0));
    }

    #[test]
    fn object_recreation_rejoins_its_groups() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.optimize_group(GROUP);

        cache.delete_object(1);
        assert!(!cache.groups[&GROUP].is_optimized());
        cache.optimize_group(GROUP);
        assert_eq!(
            cache.groups[&GROUP].layout.as_ref().unwrap().batches[0].instance_count,
            1
        );

        // The member id is still listed, so re-creating the object brings
        // it back without a new group_add.
        cache.create_object(1, triangles(RED)).unwrap();
        assert!(!cache.groups[&GROUP].is_optimized());
        cache.optimize_group(GROUP);
        assert_eq!(
            cache.groups[&GROUP].layout.as_ref().unwrap().batches[0].instance_count,
            2
        );
    }

    #[test]
    fn group_membership_edits_maintain_the_index() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        assert!(cache.object_groups[&1].contains(&GROUP));

        cache.group_remove(GROUP, &[1]);
        assert!(!cache.object_groups.contains_key(&1));

        cache.optimize_group(GROUP);
        // Object 1 no longer belongs to the group: toggling it must not
        // invalidate the layout.
        cache.hide_objects(&[1]);
        assert!(cache.groups[&GROUP].is_optimized());
    }

    #[test]
    fn delete_group_with_objects_deletes_members() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.delete_group(GROUP, true);
        assert!(cache.group(GROUP).is_none());
        assert!(cache.object(1).is_none());
        assert!(cache.object(2).is_none());
        assert!(cache.object_groups.is_empty());
    }

    #[test]
    fn clear_objects_cascades_to_groups() {
        let mut cache = cache();
        red_blue_group(&mut cache);
        cache.clear_objects();
        assert!(cache.objects.is_empty());
        assert!(cache.groups.is_empty());
        assert!(cache.object_groups.is_empty());
    }

    #[test]
    fn unknown_program_creates_an_incomplete_object() {
        let mut cache = cache();
        let mut desc = triangles(RED);
        desc.program_id = 42;
        cache.create_object(1, desc).unwrap();
        assert!(cache.object(1).unwrap().incomplete());
    }

    #[test]
    fn attribute_aliases_apply_at_creation() {
        let mut cache = cache();
        cache.set_attribute_alias("coords", "position");

        let desc = ObjectDesc {
            attributes: vec![
                AttributeBinding::new("coords", POSITIONS, 0, 0, 3, DataType::Float),
                AttributeBinding::new("color", RED, 0, 0, 4, DataType::Float),
            ],
            ..triangles(RED)
        };
        cache.create_object(1, desc).unwrap();
        assert!(!cache.object(1).unwrap().incomplete());

        // Removing the alias restores literal matching.
        cache.set_attribute_alias("coords", "");
        let desc = ObjectDesc {
            attributes: vec![
                AttributeBinding::new("coords", POSITIONS, 0, 0, 3, DataType::Float),
                AttributeBinding::new("color", RED, 0, 0, 4, DataType::Float),
            ],
            ..triangles(RED)
        };
        cache.create_object(2, desc).unwrap();
        assert!(cache.object(2).unwrap().incomplete());
    }

    #[test]
    fn byte_index_buffers_are_rejected() {
        let mut cache = cache();
        let desc = ObjectDesc {
            index: Some(IndexBinding {
                data_id: POSITIONS,
                data_type: DataType::UByte,
            }),
            ..triangles(RED)
        };
        assert!(matches!(
            cache.create_object(1, desc),
            Err(Error::UnsupportedIndexType(DataType::UByte))
        ));
    }

    #[test]
    fn primitive_shapes_use_internal_ids_and_cache_geometry() {
        let mut cache = cache();
        let interface = ProgramInterface::new(
            &[
                decl("position", 0, ShaderType::FVec3),
                decl("normal", 1, ShaderType::FVec3),
                decl("instanceScale", 3, ShaderType::FVec3),
                decl("instanceTransform", 4, ShaderType::Mat4x4),
            ],
            &[],
        );
        cache
            .programs
            .insert(2, ShaderProgram::from_interfaces(interface, None));

        cache.add_sphere(1, 1.5, 2, 0, Vec::new()).unwrap();
        cache.add_sphere(2, 0.5, 2, 0, Vec::new()).unwrap();

        // One geometry upload serves both spheres.
        assert_eq!(cache.proto_spheres.len(), 1);
        let a = cache.object(1).unwrap();
        let b = cache.object(2).unwrap();
        assert!(!a.incomplete() && !b.incomplete());
        assert_eq!(a.index.unwrap().data_id, b.index.unwrap().data_id);
        assert!(a.index.unwrap().data_id < 0);

        // Both scale singletons resolved; the radii differ per object.
        let scale_of = |oi: &ObjectInfo| {
            let s = oi.singletons.iter().find(|s| s.base_location == 3).unwrap();
            let bytes = cache.buffers[&s.data_id].data().unwrap().to_vec();
            bytemuck::cast_slice::<u8, f32>(&bytes).to_vec()
        };
        assert_eq!(scale_of(a), vec![1.5, 1.5, 1.5]);
        assert_eq!(scale_of(b), vec![0.5, 0.5, 0.5]);

        cache.clear_primitives();
        assert!(cache.proto_spheres.is_empty());
        assert!(cache.object(1).unwrap().incomplete());
    }

    #[test]
    fn clear_buffers_cascades_to_matrices_and_primitives() {
        let mut cache = cache();
        cache.create_matrix(5, &Mat4::IDENTITY).unwrap();
        red_blue_group(&mut cache);
        cache.optimize_group(GROUP);

        cache.clear_buffers();
        assert!(cache.matrices.is_empty());
        assert!(cache.object(1).unwrap().incomplete());
        assert!(!cache.groups[&GROUP].is_optimized());
        // Only the re-seeded identity remains.
        assert_eq!(cache.buffers.len(), 1);
    }
}
