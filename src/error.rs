//! Error type for fallible registry operations.

use crate::resource::DataType;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller.
///
/// Missing-resource situations encountered during optimization or rendering
/// are deliberately *not* represented here: they mark the affected object
/// incomplete, emit a `log` warning and let the rest of the batch proceed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-chosen resource id was zero or negative.
    #[error("{kind} id must be positive (got {id})")]
    InvalidId {
        /// Which registry the id was destined for.
        kind: &'static str,
        /// The offending id.
        id: i32,
    },

    /// Matrix id 0 permanently holds the identity matrix.
    #[error("matrix id 0 is reserved for the identity matrix")]
    ReservedMatrixId,

    /// A shader module failed to compile or validate.
    #[error("shader build failed: {0}")]
    ShaderBuild(String),

    /// A pick program re-declared a shared attribute at a different location.
    #[error(
        "pick program binds attribute `{name}` at location {pick_location}, \
         but the draw program uses location {location}"
    )]
    PickLocationMismatch {
        /// The attribute declared by both programs.
        name: String,
        /// Location in the draw program.
        location: u32,
        /// Location in the pick program.
        pick_location: u32,
    },

    /// Index buffers must be 16 or 32 bit; wgpu has no 8-bit index format.
    #[error("unsupported index element type {0:?} (use UShort or UInt)")]
    UnsupportedIndexType(DataType),

    /// Vertex buffer offsets and strides must be 4-byte aligned for wgpu.
    #[error("attribute `{name}`: offset {offset} / stride {stride} must be 4-byte aligned")]
    MisalignedBinding {
        /// The offending attribute name.
        name: String,
        /// Byte offset of the binding.
        offset: u32,
        /// Byte stride of the binding.
        stride: u32,
    },

    /// No `wgpu::VertexFormat` exists for this element type/count/normalization.
    #[error("attribute `{name}`: no vertex format for {count} x {data_type:?} (normalized: {normalized})")]
    UnsupportedVertexFormat {
        /// The offending attribute name.
        name: String,
        /// Element type of the binding.
        data_type: DataType,
        /// Elements per vertex.
        count: u32,
        /// Whether integer data is normalized to floats.
        normalized: bool,
    },
}
