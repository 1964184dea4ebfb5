//! GPU resource registries: buffers, shader programs, the pick target.

pub use crate::resource::buffer::{BufferTarget, DataType, DeviceBuffer};
pub use crate::resource::pick_target::{
    decode_pick_pixel, PickTarget, PICK_FORMAT, PICK_ID_MASK, PICK_REGION_RADIUS,
};
pub use crate::resource::program::{
    AttributeDecl, AttributeVar, ProgramCompiler, ProgramInterface, ProgramSpec, ShaderProgram,
    ShaderType, UniformDecl, UniformValue, UniformVar, WgslCompiler, PICK_ID_ATTRIBUTE,
};
pub(crate) use crate::resource::program::CompiledProgram;

mod buffer;
mod pick_target;
mod program;
