/*!
# batch3d

A retained-mode scene cache for [wgpu](https://docs.rs/wgpu).

Applications register drawable objects once (geometry buffers, a shader
program, a transform, attribute bindings), then render or hit-test large
numbers of them per frame. The cache detects objects that are geometrically
and programmatically identical and collapses each such set into a single
instanced draw call: per-object constants ("singleton" attributes,
including each object's transform) are interleaved into one per-instance
buffer, so a thousand spheres differing only in color and position cost one
draw.

Alongside the draw path, every instanced batch keeps a parallel *pick*
representation: an offscreen pass renders each object's id as a color, and
[`SceneCache::pick`] reads a pixel back to answer "which object is at this
screen coordinate?".

## Overview

* [`SceneCache`] owns every registry (buffers, programs, matrices, objects,
  groups) and is one independent rendering session.
* [`Context`](context::Context) wraps the `wgpu` device/queue pair the
  cache draws with.
* Mutating anything draw-relevant (membership, visibility, transparency,
  deletion) invalidates exactly the groups referencing the changed object;
  they re-optimize on their next use.
* Canonical shapes (spheres, cylinders, cones, disks) are generated and
  cached on demand by [`SceneCache::add_sphere`] and friends.

```no_run
use batch3d::prelude::*;

fn frame(
    ctxt: &Context,
    cache: &mut SceneCache,
    encoder: &mut wgpu::CommandEncoder,
    color: &wgpu::TextureView,
    depth: &wgpu::TextureView,
) {
    // Two spheres sharing program 1: rendered as one instanced draw call.
    cache.add_sphere(1, 0.5, 1, 0, Vec::new()).unwrap();
    cache.add_sphere(2, 1.5, 1, 0, Vec::new()).unwrap();
    cache.create_group(1).unwrap();
    cache.group_add(1, &[1, 2]);

    let mut rc = RenderContext {
        ctxt,
        encoder,
        color_view: color,
        depth_view: depth,
        viewport_width: 800,
        viewport_height: 600,
    };
    cache.render(&[1], &mut rc);

    let hit = cache.pick(ctxt, &[1], 400, 300);
    if hit != 0 {
        println!("picked object {hit}");
    }
}
```

Missing resources never abort a frame: an object referencing a deleted
buffer or program is marked incomplete, logged through [`log`], and skipped
while the rest of the batch draws. Configuration errors (non-positive ids,
shader build failures) are returned as [`Error`](error::Error).

[`SceneCache`]: scene::SceneCache
[`SceneCache::pick`]: scene::SceneCache::pick
[`SceneCache::add_sphere`]: scene::SceneCache::add_sphere
*/
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
extern crate bitflags;

pub use glamx;

pub mod context;
pub mod error;
pub mod procedural;
pub mod renderer;
pub mod resource;
pub mod scene;

pub mod prelude {
    //! The commonly used surface of the crate.
    pub use crate::context::Context;
    pub use crate::error::{Error, Result};
    pub use crate::renderer::RenderContext;
    pub use crate::resource::{
        AttributeDecl, BufferTarget, DataType, ProgramSpec, ShaderType, UniformDecl, UniformValue,
    };
    pub use crate::scene::{AttributeBinding, IndexBinding, ObjectDesc, Primitive, SceneCache};
    pub use glamx::{Mat2, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
}
