//! The render/pick traversal consuming optimized group layouts.
//!
//! The traversal runs in two phases over the same batch order. The prepare
//! phase performs every mutation: it re-optimizes invalidated groups,
//! uploads referenced buffers, lazily builds the pipelines batches are
//! missing, and flushes each program's pending uniform writes the first time
//! the traversal reaches it. The encode phase is read-only: it walks the
//! batches again inside an open render pass and issues the draw calls,
//! binding program state only when the program changes.

use std::collections::HashMap;

use crate::context::Context;
use crate::resource::{DeviceBuffer, ShaderProgram, PICK_FORMAT};
use crate::scene::group::GroupInfo;
use crate::scene::object::{IndexBinding, ObjectInfo};
use crate::scene::optimizer::{build_group_layout, BatchPlan, GroupLayout, SlotPlan, SlotSource};
use crate::scene::Primitive;

/// Everything a draw traversal needs about the current frame.
///
/// The caller owns the frame: it creates the encoder, provides the
/// attachment views and submits after the traversal returns, so several
/// renderers can share one frame.
pub struct RenderContext<'a> {
    /// The GPU context.
    pub ctxt: &'a Context,
    /// The command encoder for this frame.
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// The color attachment view.
    pub color_view: &'a wgpu::TextureView,
    /// The depth attachment view.
    pub depth_view: &'a wgpu::TextureView,
    /// The viewport width in pixels.
    pub viewport_width: u32,
    /// The viewport height in pixels.
    pub viewport_height: u32,
}

/// Which of a batch's two parallel representations a traversal consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PassKind {
    Draw,
    Pick,
}

impl ShaderProgram {
    fn compiled_for(&self, kind: PassKind) -> Option<&crate::resource::CompiledProgram> {
        match kind {
            PassKind::Draw => self.compiled.as_ref(),
            PassKind::Pick => self.pick_compiled.as_ref(),
        }
    }

    fn flush_for(&mut self, kind: PassKind, ctxt: &Context) {
        match kind {
            PassKind::Draw => self.flush_pending(ctxt),
            PassKind::Pick => self.flush_pick_pending(ctxt),
        }
    }
}

impl BatchPlan {
    fn plan_for(&self, kind: PassKind) -> Option<&crate::scene::optimizer::PassPlan> {
        match kind {
            PassKind::Draw => self.draw.as_ref(),
            PassKind::Pick => self.pick.as_ref(),
        }
    }
}

/// Should this batch be skipped by both phases?
fn skip_batch(batch: &BatchPlan, objects: &HashMap<i32, ObjectInfo>) -> bool {
    if batch.incomplete {
        return true;
    }
    match batch.object_id {
        Some(id) => match objects.get(&id) {
            Some(oi) => oi.hidden() || oi.incomplete(),
            None => true,
        },
        None => false,
    }
}

/// Builds the render pipeline for one batch pass.
///
/// The frame-global fixed state of the traversal lives here: depth test on,
/// back-face culling on, blending off. Scissoring is never enabled, which is
/// wgpu's default state for a pass.
fn build_pipeline(
    ctxt: &Context,
    module: &wgpu::ShaderModule,
    pipeline_layout: &wgpu::PipelineLayout,
    slots: &[SlotPlan],
    primitive: Primitive,
    index: Option<IndexBinding>,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let attributes: Vec<Vec<wgpu::VertexAttribute>> = slots
        .iter()
        .map(|s| {
            s.attributes
                .iter()
                .map(|a| wgpu::VertexAttribute {
                    format: a.format,
                    offset: a.offset,
                    shader_location: a.location,
                })
                .collect()
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout> = slots
        .iter()
        .zip(&attributes)
        .map(|(s, attributes)| wgpu::VertexBufferLayout {
            array_stride: s.stride,
            step_mode: s.step,
            attributes,
        })
        .collect();

    // Indexed strips need the index format baked into the pipeline.
    let strip_index_format = if primitive.is_strip() {
        index.and_then(|ib| ib.data_type.index_format())
    } else {
        None
    };

    ctxt.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("batch3d_pipeline"),
        layout: Some(pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: primitive.to_wgpu(),
            strip_index_format,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: Context::depth_format(),
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

/// The mutation phase: optimize, upload, build pipelines, flush uniforms.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare(
    ctxt: &Context,
    kind: PassKind,
    group_ids: &[i32],
    groups: &mut HashMap<i32, GroupInfo>,
    objects: &HashMap<i32, ObjectInfo>,
    programs: &mut HashMap<i32, ShaderProgram>,
    buffers: &mut HashMap<i32, DeviceBuffer>,
) {
    let target_format = match kind {
        PassKind::Draw => ctxt.surface_format,
        PassKind::Pick => PICK_FORMAT,
    };

    for gid in group_ids {
        let Some(group) = groups.get_mut(gid) else {
            log::warn!("unknown group {} in draw list", gid);
            continue;
        };
        if group.objects.is_empty() {
            continue;
        }

        if group.layout.is_none() {
            group.layout = Some(build_group_layout(
                &group.objects,
                objects,
                programs,
                buffers,
            ));
        }

        let GroupLayout {
            batches,
            buffers: synthesized,
        } = group.layout.as_mut().unwrap();

        // Program binds reset at every group boundary, like the encode phase.
        let mut current_program = 0i32;
        for batch in batches.iter_mut() {
            if skip_batch(batch, objects) {
                continue;
            }
            let (program_id, primitive, index) = (batch.program_id, batch.primitive, batch.index);
            let Some(program) = programs.get_mut(&program_id) else {
                continue;
            };
            if program_id != current_program {
                program.flush_for(kind, ctxt);
                current_program = program_id;
            }

            let Some(plan) = (match kind {
                PassKind::Draw => batch.draw.as_mut(),
                PassKind::Pick => batch.pick.as_mut(),
            }) else {
                continue;
            };

            if plan.pipeline.is_none() {
                let Some(compiled) = program.compiled_for(kind) else {
                    continue;
                };
                plan.pipeline = Some(build_pipeline(
                    ctxt,
                    &compiled.module,
                    &compiled.pipeline_layout,
                    &plan.slots,
                    primitive,
                    index,
                    target_format,
                ));
            }

            for slot in &plan.slots {
                match slot.source {
                    SlotSource::Registry(id) => {
                        if let Some(buffer) = buffers.get_mut(&id) {
                            buffer.load_to_gpu(ctxt);
                        }
                    }
                    SlotSource::Synthesized(i) => synthesized[i].load_to_gpu(ctxt),
                }
            }
            if let Some(ib) = index {
                if let Some(buffer) = buffers.get_mut(&ib.data_id) {
                    buffer.load_to_gpu(ctxt);
                }
            }
        }
    }
}

/// The read-only phase: issue the draw calls inside an open pass.
pub(crate) fn encode(
    kind: PassKind,
    pass: &mut wgpu::RenderPass<'_>,
    group_ids: &[i32],
    groups: &HashMap<i32, GroupInfo>,
    objects: &HashMap<i32, ObjectInfo>,
    programs: &HashMap<i32, ShaderProgram>,
    buffers: &HashMap<i32, DeviceBuffer>,
) {
    for gid in group_ids {
        let Some(group) = groups.get(gid) else { continue };
        let Some(layout) = group.layout.as_ref() else {
            continue;
        };

        let mut current_program = 0i32;
        for batch in &layout.batches {
            if skip_batch(batch, objects) {
                continue;
            }
            let Some(program) = programs.get(&batch.program_id) else {
                continue;
            };
            let Some(compiled) = program.compiled_for(kind) else {
                continue;
            };
            let Some(plan) = batch.plan_for(kind) else {
                continue;
            };
            let Some(pipeline) = plan.pipeline.as_ref() else {
                continue;
            };

            // Resolve every slot up front so a deleted buffer skips the
            // whole batch instead of drawing with partial state.
            let mut slices = Vec::with_capacity(plan.slots.len());
            let mut complete = true;
            for slot in &plan.slots {
                let buffer = match slot.source {
                    SlotSource::Registry(id) => buffers.get(&id).and_then(|b| b.buffer()),
                    SlotSource::Synthesized(i) => layout.buffers[i].buffer(),
                };
                match buffer {
                    Some(b) => slices.push(b.slice(slot.offset..)),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }

            let index = match batch.index {
                Some(ib) => {
                    let buffer = buffers.get(&ib.data_id).and_then(|b| b.buffer());
                    let format = ib.data_type.index_format();
                    match (buffer, format) {
                        (Some(b), Some(f)) => Some((b, f)),
                        _ => continue,
                    }
                }
                None => None,
            };

            if batch.program_id != current_program {
                pass.set_bind_group(0, &compiled.bind_group, &[]);
                current_program = batch.program_id;
            }
            pass.set_pipeline(pipeline);
            for (slot, slice) in slices.into_iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, slice);
            }

            // A zero instance count requests a plain draw; wgpu expresses
            // that as a single instance.
            let instances = 0..batch.instance_count.max(1);
            match index {
                Some((buffer, format)) => {
                    pass.set_index_buffer(buffer.slice(..), format);
                    pass.draw_indexed(batch.first..batch.first + batch.count, 0, instances);
                }
                None => pass.draw(batch.first..batch.first + batch.count, instances),
            }
        }
    }
}
