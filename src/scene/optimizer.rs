//! The group optimizer: reclassifies a group's objects into instanced
//! batches.
//!
//! Objects that share a program, transparency state, topology, index buffer
//! and per-vertex attribute bindings differ only in their per-object
//! constants (singleton attributes, including the instance transform). Such
//! objects are drawn as one instanced call: their singleton values are
//! interleaved into a single per-instance buffer, and each former constant
//! becomes a vertex attribute that steps once per instance.
//!
//! Objects whose draw ranges disagree fall back to one draw call each; the
//! fallback path does not participate in picking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::resource::{DeviceBuffer, ShaderProgram, PICK_ID_ATTRIBUTE};
use crate::scene::attribute::{vertex_format, AttributeBinding, Primitive};
use crate::scene::object::{ArrayAttribute, IndexBinding, ObjectInfo};

/// Where a vertex-buffer slot reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSource {
    /// A registry buffer, by id.
    Registry(i32),
    /// A buffer synthesized by the optimizer, by index into
    /// [`GroupLayout::buffers`].
    Synthesized(usize),
}

/// One attribute inside a vertex-buffer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotAttribute {
    /// Shader location.
    pub location: u32,
    /// Byte offset inside the slot's stride.
    pub offset: u64,
    /// Vertex format.
    pub format: wgpu::VertexFormat,
}

/// One vertex-buffer slot of a batch.
#[derive(Clone, Debug)]
pub struct SlotPlan {
    /// The buffer backing this slot.
    pub source: SlotSource,
    /// Byte offset of the slice bound to the slot.
    pub offset: u64,
    /// Array stride. A zero stride on an instance-step slot broadcasts one
    /// value to the whole draw.
    pub stride: u64,
    /// Per-vertex or per-instance stepping.
    pub step: wgpu::VertexStepMode,
    /// Attributes read from this slot.
    pub attributes: Vec<SlotAttribute>,
}

/// The vertex-buffer state of a batch for one pass (draw or pick), plus the
/// pipeline the render traversal lazily builds and caches for it.
#[derive(Debug, Default)]
pub struct PassPlan {
    /// Vertex-buffer slots, in slot order.
    pub slots: Vec<SlotPlan>,
    /// Built on first use by the traversal; dropped with the layout.
    pub pipeline: Option<wgpu::RenderPipeline>,
}

/// One draw descriptor of an optimized group.
#[derive(Debug)]
pub struct BatchPlan {
    /// The backing object for fallback batches; `None` for instanced
    /// batches, which aggregate several objects.
    pub object_id: Option<i32>,
    /// Program switching key for the traversal.
    pub program_id: i32,
    /// Topology.
    pub primitive: Primitive,
    /// First vertex or index.
    pub first: u32,
    /// Vertex or index count.
    pub count: u32,
    /// Index buffer, if the draw is indexed.
    pub index: Option<IndexBinding>,
    /// Number of instances; 0 requests a plain (non-instanced) draw.
    pub instance_count: u32,
    /// Set when a resource went missing during optimization; the batch is
    /// kept (so ordering stays stable) but skipped by traversals.
    pub incomplete: bool,
    /// Draw-pass vertex state.
    pub draw: Option<PassPlan>,
    /// Pick-pass vertex state; `None` when the program has no pick variant,
    /// the pick variant lacks a `pickId` attribute, or this is a fallback
    /// batch.
    pub pick: Option<PassPlan>,
}

/// The optimized layout of a group: ordered batches plus the buffers
/// synthesized for instancing, whose lifetime is tied to the layout.
#[derive(Debug, Default)]
pub struct GroupLayout {
    /// Draw descriptors, in traversal order.
    pub batches: Vec<BatchPlan>,
    /// Synthesized instance and pick-id buffers.
    pub buffers: Vec<DeviceBuffer>,
}

/// Composite partition key. Two objects land in the same bucket exactly when
/// every field matches; `Ord` gives buckets a stable iteration order, which
/// together with ascending member ids makes repeated optimizations of an
/// unchanged group byte-identical.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct BucketKey {
    program_id: i32,
    transparent: bool,
    primitive: Primitive,
    index: Option<IndexBinding>,
    arrays: Vec<AttributeBinding>,
}

impl BucketKey {
    fn of(oi: &ObjectInfo) -> BucketKey {
        BucketKey {
            program_id: oi.program_id,
            transparent: oi.transparent(),
            primitive: oi.primitive,
            index: oi.index,
            arrays: oi.arrays.iter().map(|a| a.binding.clone()).collect(),
        }
    }
}

/// Builds the optimized layout for a group's current member set.
pub(crate) fn build_group_layout(
    members: &BTreeSet<i32>,
    objects: &HashMap<i32, ObjectInfo>,
    programs: &HashMap<i32, ShaderProgram>,
    buffers: &HashMap<i32, DeviceBuffer>,
) -> GroupLayout {
    let mut layout = GroupLayout::default();

    // First pass: bucket shown, complete objects by the composite key.
    let mut buckets: BTreeMap<BucketKey, Vec<i32>> = BTreeMap::new();
    for &id in members {
        let Some(oi) = objects.get(&id) else { continue };
        if oi.hidden() || oi.incomplete() {
            continue;
        }
        buckets.entry(BucketKey::of(oi)).or_default().push(id);
    }

    // Second pass: buckets whose members agree on (first, count) are
    // instancing-eligible; size-1 buckets trivially so. The rest fall
    // through to per-object batches after all instanced ones.
    let mut fallback: Vec<i32> = Vec::new();
    for (key, ids) in &buckets {
        let proto = &objects[&ids[0]];
        let uniform_range = ids
            .iter()
            .all(|id| (objects[id].first, objects[id].count) == (proto.first, proto.count));
        if uniform_range {
            build_instanced_batch(&mut layout, key, ids, objects, programs, buffers);
        } else {
            fallback.extend_from_slice(ids);
        }
    }

    for id in fallback {
        build_single_batch(&mut layout, id, &objects[&id], programs, buffers);
    }

    layout
}

/// Builds the per-vertex slot for one array attribute, at the location the
/// given pass uses for it.
fn array_slot(a: &ArrayAttribute, location: u32, buffers: &HashMap<i32, DeviceBuffer>) -> Option<SlotPlan> {
    buffers.get(&a.binding.data_id)?;
    let format = vertex_format(a.binding.data_type, a.binding.count, a.binding.normalized)?;
    let elem_size = u64::from(a.binding.count * a.binding.data_type.size());
    let attributes = (0..a.num_locations)
        .map(|l| SlotAttribute {
            location: location + l,
            offset: u64::from(l) * elem_size,
            format,
        })
        .collect();
    Some(SlotPlan {
        source: SlotSource::Registry(a.binding.data_id),
        offset: u64::from(a.binding.offset),
        stride: u64::from(a.binding.effective_stride()),
        step: wgpu::VertexStepMode::Vertex,
        attributes,
    })
}

/// Builds the attribute list of an interleaved singleton slot, using the
/// draw locations or, for the pick pass, the pick locations (entries the
/// pick program does not declare are skipped but still advance the offset).
fn singleton_slot_attributes(oi: &ObjectInfo, for_pick: bool) -> Option<Vec<SlotAttribute>> {
    let mut attributes = Vec::new();
    let mut offset = 0u32;
    for s in &oi.singletons {
        let slot_size = s.slot_size();
        let location = if for_pick {
            match s.pick_location {
                Some(loc) => loc,
                None => {
                    offset += slot_size;
                    continue;
                }
            }
        } else {
            s.base_location
        };
        let format = vertex_format(s.data_type, s.num_elements, s.normalized)?;
        let elem_size = s.num_elements * s.data_type.size();
        for l in 0..s.num_locations {
            attributes.push(SlotAttribute {
                location: location + l,
                offset: u64::from(offset + l * elem_size),
                format,
            });
        }
        offset += slot_size;
    }
    Some(attributes)
}

fn build_instanced_batch(
    layout: &mut GroupLayout,
    key: &BucketKey,
    ids: &[i32],
    objects: &HashMap<i32, ObjectInfo>,
    programs: &HashMap<i32, ShaderProgram>,
    buffers: &HashMap<i32, DeviceBuffer>,
) {
    let proto = &objects[&ids[0]];
    let mut batch = BatchPlan {
        object_id: None,
        program_id: key.program_id,
        primitive: proto.primitive,
        first: proto.first,
        count: proto.count,
        index: proto.index,
        instance_count: ids.len() as u32,
        incomplete: false,
        draw: None,
        pick: None,
    };

    let Some(program) = programs.get(&key.program_id) else {
        log::warn!("missing program {} while optimizing a group", key.program_id);
        batch.incomplete = true;
        layout.batches.push(batch);
        return;
    };

    // Draw-pass slots: the template's shared per-vertex bindings...
    let mut draw = PassPlan::default();
    for a in &proto.arrays {
        match array_slot(a, a.location, buffers) {
            Some(slot) => draw.slots.push(slot),
            None => {
                // Buffer deleted after object creation, before rendering.
                log::warn!(
                    "missing buffer {} while optimizing a group",
                    a.binding.data_id
                );
                batch.incomplete = true;
                layout.batches.push(batch);
                return;
            }
        }
    }

    // ...plus one interleaved per-instance buffer aggregating the members'
    // singleton values, each value in its stride-aligned slot. The values
    // are re-read from the singleton buffers' shadows so replaced buffers
    // (matrix updates) are picked up.
    let sizes: Vec<u32> = proto.singletons.iter().map(|s| s.slot_size()).collect();
    let stride: u32 = sizes.iter().sum();
    let mut instance_buffer = None;
    if stride > 0 {
        let mut image = vec![0u8; stride as usize * ids.len()];
        for (i, id) in ids.iter().enumerate() {
            let mut pos = i * stride as usize;
            for (s, size) in objects[id].singletons.iter().zip(&sizes) {
                let Some(bytes) = buffers.get(&s.data_id).and_then(|b| b.data()) else {
                    log::warn!(
                        "missing singleton buffer {} while optimizing a group",
                        s.data_id
                    );
                    batch.incomplete = true;
                    layout.batches.push(batch);
                    return;
                };
                let n = bytes.len().min(*size as usize);
                image[pos..pos + n].copy_from_slice(&bytes[..n]);
                pos += *size as usize;
            }
        }

        let index = layout.buffers.len();
        layout
            .buffers
            .push(DeviceBuffer::from_data(crate::resource::BufferTarget::Array, image));
        instance_buffer = Some(index);

        match singleton_slot_attributes(proto, false) {
            Some(attributes) => draw.slots.push(SlotPlan {
                source: SlotSource::Synthesized(index),
                offset: 0,
                stride: u64::from(stride),
                step: wgpu::VertexStepMode::Instance,
                attributes,
            }),
            None => {
                batch.incomplete = true;
                layout.batches.push(batch);
                return;
            }
        }
    }
    batch.draw = Some(draw);

    // Pick-pass slots mirror the draw construction at the pick program's
    // locations, plus the per-instance object-id buffer. No pick program or
    // no `pickId` attribute means no pick state for this batch.
    let pick_interface = program.pick_interface();
    let pick_id_location = pick_interface
        .and_then(|p| p.attribute(PICK_ID_ATTRIBUTE))
        .map(|a| a.location);

    if let (Some(pick_iface), Some(id_location)) = (pick_interface, pick_id_location) {
        let mut pick = PassPlan::default();
        for a in &proto.arrays {
            let Some(var) = pick_iface.attribute(&a.binding.name) else {
                continue;
            };
            match array_slot(a, var.location, buffers) {
                Some(slot) => pick.slots.push(slot),
                None => return finish_without_pick(layout, batch),
            }
        }

        if let Some(index) = instance_buffer {
            match singleton_slot_attributes(proto, true) {
                Some(attributes) => {
                    if !attributes.is_empty() {
                        pick.slots.push(SlotPlan {
                            source: SlotSource::Synthesized(index),
                            offset: 0,
                            stride: u64::from(stride),
                            step: wgpu::VertexStepMode::Instance,
                            attributes,
                        });
                    }
                }
                None => return finish_without_pick(layout, batch),
            }
        }

        // One unsigned 32-bit id per member; read as a normalized ubyte4 so
        // the id's little-endian bytes become the output color.
        let ids_le: Vec<u8> = ids.iter().flat_map(|id| (*id as u32).to_le_bytes()).collect();
        let id_index = layout.buffers.len();
        layout
            .buffers
            .push(DeviceBuffer::from_data(crate::resource::BufferTarget::Array, ids_le));
        pick.slots.push(SlotPlan {
            source: SlotSource::Synthesized(id_index),
            offset: 0,
            stride: 4,
            step: wgpu::VertexStepMode::Instance,
            attributes: vec![SlotAttribute {
                location: id_location,
                offset: 0,
                format: wgpu::VertexFormat::Unorm8x4,
            }],
        });

        batch.pick = Some(pick);
    }

    layout.batches.push(batch);
}

fn finish_without_pick(layout: &mut GroupLayout, batch: BatchPlan) {
    layout.batches.push(batch);
}

/// Emits one per-object batch for an eligibility-rejected object. Its
/// singleton values are bound as zero-stride instance slots over their own
/// registry buffers, the wgpu equivalent of constant vertex attributes.
fn build_single_batch(
    layout: &mut GroupLayout,
    id: i32,
    oi: &ObjectInfo,
    programs: &HashMap<i32, ShaderProgram>,
    buffers: &HashMap<i32, DeviceBuffer>,
) {
    let mut batch = BatchPlan {
        object_id: Some(id),
        program_id: oi.program_id,
        primitive: oi.primitive,
        first: oi.first,
        count: oi.count,
        index: oi.index,
        instance_count: 0,
        incomplete: false,
        draw: None,
        pick: None,
    };

    if !programs.contains_key(&oi.program_id) {
        log::warn!("missing program {} for object {}", oi.program_id, id);
        batch.incomplete = true;
        layout.batches.push(batch);
        return;
    }

    let mut draw = PassPlan::default();
    for a in &oi.arrays {
        match array_slot(a, a.location, buffers) {
            Some(slot) => draw.slots.push(slot),
            None => {
                log::warn!("missing buffer {} for object {}", a.binding.data_id, id);
                batch.incomplete = true;
                layout.batches.push(batch);
                return;
            }
        }
    }

    for s in &oi.singletons {
        if buffers.get(&s.data_id).is_none() {
            log::warn!("missing singleton buffer {} for object {}", s.data_id, id);
            batch.incomplete = true;
            layout.batches.push(batch);
            return;
        }
        let Some(format) = vertex_format(s.data_type, s.num_elements, s.normalized) else {
            batch.incomplete = true;
            layout.batches.push(batch);
            return;
        };
        let elem_size = s.num_elements * s.data_type.size();
        let attributes = (0..s.num_locations)
            .map(|l| SlotAttribute {
                location: s.base_location + l,
                offset: u64::from(l * elem_size),
                format,
            })
            .collect();
        draw.slots.push(SlotPlan {
            source: SlotSource::Registry(s.data_id),
            offset: 0,
            stride: 0,
            step: wgpu::VertexStepMode::Instance,
            attributes,
        });
    }

    batch.draw = Some(draw);
    layout.batches.push(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{
        AttributeDecl, BufferTarget, DataType, ProgramInterface, ShaderType,
    };
    use crate::scene::object::{resolve_attributes, ObjectFlags};

    const POSITIONS: i32 = 1;
    const RED: i32 = 10;
    const BLUE: i32 = 11;
    const MATRIX: i32 = 20;

    fn decl(name: &str, location: u32, ty: ShaderType) -> AttributeDecl {
        AttributeDecl {
            name: name.to_string(),
            location,
            ty,
        }
    }

    fn draw_interface() -> ProgramInterface {
        ProgramInterface::new(
            &[
                decl("position", 0, ShaderType::FVec3),
                decl("color", 1, ShaderType::FVec4),
                decl("instanceTransform", 2, ShaderType::Mat4x4),
            ],
            &[],
        )
    }

    fn pick_interface() -> ProgramInterface {
        ProgramInterface::new(
            &[
                decl("position", 0, ShaderType::FVec3),
                decl("instanceTransform", 2, ShaderType::Mat4x4),
                decl(PICK_ID_ATTRIBUTE, 6, ShaderType::FVec4),
            ],
            &[],
        )
    }

    fn programs(with_pick: bool) -> HashMap<i32, ShaderProgram> {
        let pick = with_pick.then(pick_interface);
        let mut map = HashMap::new();
        map.insert(1, ShaderProgram::from_interfaces(draw_interface(), pick));
        map
    }

    fn test_buffers() -> HashMap<i32, DeviceBuffer> {
        let mut map = HashMap::new();
        map.insert(
            POSITIONS,
            DeviceBuffer::from_data(BufferTarget::Array, vec![0u8; 30 * 12]),
        );
        map.insert(
            RED,
            DeviceBuffer::singleton(bytemuck::cast_slice(&[1.0f32, 0.0, 0.0, 1.0]).to_vec()),
        );
        map.insert(
            BLUE,
            DeviceBuffer::singleton(bytemuck::cast_slice(&[0.0f32, 0.0, 1.0, 1.0]).to_vec()),
        );
        map.insert(
            MATRIX,
            DeviceBuffer::singleton(
                bytemuck::cast_slice(&glamx::Mat4::IDENTITY.to_cols_array()).to_vec(),
            ),
        );
        map
    }

    fn object(
        color_buffer: i32,
        first: u32,
        count: u32,
        programs: &HashMap<i32, ShaderProgram>,
        buffers: &HashMap<i32, DeviceBuffer>,
    ) -> ObjectInfo {
        let bindings = vec![
            AttributeBinding::new("position", POSITIONS, 0, 0, 3, DataType::Float),
            AttributeBinding::new("color", color_buffer, 0, 0, 4, DataType::Float),
            AttributeBinding::new("instanceTransform", MATRIX, 0, 0, 16, DataType::Float),
        ];
        let program = &programs[&1];
        let (arrays, singletons, incomplete) = resolve_attributes(
            0,
            &bindings,
            program.interface(),
            program.pick_interface(),
            buffers,
        );
        assert!(!incomplete);
        ObjectInfo {
            program_id: 1,
            matrix_id: 0,
            arrays,
            singletons,
            primitive: Primitive::Triangles,
            first,
            count,
            index: None,
            flags: ObjectFlags::default(),
        }
    }

    fn scene(
        with_pick: bool,
    ) -> (
        HashMap<i32, ShaderProgram>,
        HashMap<i32, DeviceBuffer>,
        HashMap<i32, ObjectInfo>,
    ) {
        let programs = programs(with_pick);
        let buffers = test_buffers();
        let mut objects = HashMap::new();
        objects.insert(1, object(RED, 0, 30, &programs, &buffers));
        objects.insert(2, object(BLUE, 0, 30, &programs, &buffers));
        (programs, buffers, objects)
    }

    fn members(ids: &[i32]) -> BTreeSet<i32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn identical_objects_collapse_into_one_instanced_batch() {
        let (programs, buffers, objects) = scene(false);
        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);

        assert_eq!(layout.batches.len(), 1);
        let batch = &layout.batches[0];
        assert_eq!(batch.instance_count, 2);
        assert!(!batch.incomplete);
        assert!(batch.object_id.is_none());

        // position slot + interleaved singleton slot.
        let draw = batch.draw.as_ref().unwrap();
        assert_eq!(draw.slots.len(), 2);
        assert_eq!(draw.slots[0].step, wgpu::VertexStepMode::Vertex);
        assert_eq!(draw.slots[1].step, wgpu::VertexStepMode::Instance);
    }

    #[test]
    fn singleton_interleaving_round_trips() {
        let (programs, buffers, objects) = scene(false);
        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);

        // color (vec4 f32 = 16 bytes) + instanceTransform (mat4 = 64 bytes).
        let stride = 80usize;
        let image = layout.buffers[0].data().unwrap();
        assert_eq!(image.len(), stride * 2);

        let slot = &layout.batches[0].draw.as_ref().unwrap().slots[1];
        assert_eq!(slot.stride, stride as u64);
        // color at offset 0, transform columns at 16/32/48/64.
        assert_eq!(slot.attributes[0].location, 1);
        assert_eq!(slot.attributes[0].offset, 0);
        assert_eq!(slot.attributes[1].location, 2);
        assert_eq!(slot.attributes[1].offset, 16);
        assert_eq!(slot.attributes[4].offset, 64);

        // Instance 0 is object 1 (red), instance 1 is object 2 (blue).
        let red: &[f32] = bytemuck::cast_slice(&image[0..16]);
        let blue: &[f32] = bytemuck::cast_slice(&image[stride..stride + 16]);
        assert_eq!(red, &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(blue, &[0.0, 0.0, 1.0, 1.0]);
        // The matrix slots hold the identity, bit for bit.
        let m: &[f32] = bytemuck::cast_slice(&image[16..80]);
        assert_eq!(m, &glamx::Mat4::IDENTITY.to_cols_array());
    }

    #[test]
    fn reoptimization_is_byte_identical() {
        let (programs, buffers, objects) = scene(true);
        let a = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);
        let b = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);

        assert_eq!(a.buffers.len(), b.buffers.len());
        for (x, y) in a.buffers.iter().zip(&b.buffers) {
            assert_eq!(x.data(), y.data());
        }
    }

    #[test]
    fn a_single_object_is_an_instanced_batch_of_one() {
        let (programs, buffers, objects) = scene(false);
        let layout = build_group_layout(&members(&[1]), &objects, &programs, &buffers);

        assert_eq!(layout.batches.len(), 1);
        assert_eq!(layout.batches[0].instance_count, 1);
    }

    #[test]
    fn mismatched_ranges_fall_back_to_single_draws() {
        let (programs, buffers, mut objects) = scene(false);
        objects.get_mut(&2).unwrap().first = 3;

        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);

        assert_eq!(layout.batches.len(), 2);
        for batch in &layout.batches {
            assert_eq!(batch.instance_count, 0);
            assert!(batch.object_id.is_some());
            // Picking is only supported through the instanced path.
            assert!(batch.pick.is_none());
            // Singletons become zero-stride instance slots.
            let draw = batch.draw.as_ref().unwrap();
            let constant = draw
                .slots
                .iter()
                .find(|s| s.step == wgpu::VertexStepMode::Instance)
                .unwrap();
            assert_eq!(constant.stride, 0);
        }
        assert!(layout.buffers.is_empty());
    }

    #[test]
    fn transparency_splits_buckets() {
        let (programs, buffers, mut objects) = scene(false);
        objects.get_mut(&2).unwrap().flags |= ObjectFlags::TRANSPARENT;

        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);
        assert_eq!(layout.batches.len(), 2);
        assert!(layout.batches.iter().all(|b| b.instance_count == 1));
    }

    #[test]
    fn hidden_and_unknown_objects_do_not_participate() {
        let (programs, buffers, mut objects) = scene(false);
        objects.get_mut(&2).unwrap().flags |= ObjectFlags::HIDDEN;

        let layout = build_group_layout(&members(&[1, 2, 77]), &objects, &programs, &buffers);
        assert_eq!(layout.batches.len(), 1);
        assert_eq!(layout.batches[0].instance_count, 1);
    }

    #[test]
    fn pick_plan_uses_pick_locations_and_id_buffer() {
        let (programs, buffers, objects) = scene(true);
        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);

        let batch = &layout.batches[0];
        let pick = batch.pick.as_ref().unwrap();

        // position + interleaved singletons + pick ids.
        assert_eq!(pick.slots.len(), 3);

        // The singleton slot skips `color` (absent from the pick program)
        // but keeps the transform at its shared location and offset.
        let singleton = &pick.slots[1];
        assert_eq!(singleton.attributes.len(), 4);
        assert_eq!(singleton.attributes[0].location, 2);
        assert_eq!(singleton.attributes[0].offset, 16);

        // The id slot holds each member's object id, little endian.
        let id_slot = &pick.slots[2];
        assert_eq!(id_slot.stride, 4);
        assert_eq!(id_slot.attributes[0].location, 6);
        assert_eq!(id_slot.attributes[0].format, wgpu::VertexFormat::Unorm8x4);
        let SlotSource::Synthesized(idx) = id_slot.source else {
            panic!("pick ids must be synthesized")
        };
        let bytes = layout.buffers[idx].data().unwrap();
        assert_eq!(bytes, &[1u8, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn no_pick_program_means_no_pick_plan() {
        let (programs, buffers, objects) = scene(false);
        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);
        assert!(layout.batches[0].pick.is_none());
    }

    #[test]
    fn missing_program_keeps_an_incomplete_batch() {
        let (_, buffers, objects) = scene(false);
        let layout = build_group_layout(&members(&[1, 2]), &objects, &HashMap::new(), &buffers);

        assert_eq!(layout.batches.len(), 1);
        assert!(layout.batches[0].incomplete);
        assert!(layout.batches[0].draw.is_none());
    }

    #[test]
    fn missing_array_buffer_keeps_an_incomplete_batch() {
        let (programs, mut buffers, objects) = scene(false);
        buffers.remove(&POSITIONS);

        let layout = build_group_layout(&members(&[1, 2]), &objects, &programs, &buffers);
        assert!(layout.batches[0].incomplete);
    }
}
