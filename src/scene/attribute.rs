//! Attribute bindings and their mapping onto wgpu vertex state.

use crate::error::{Error, Result};
use crate::resource::DataType;

/// Primitive topologies accepted by draw objects.
///
/// This is the wgpu-supported set; there is no line loop or triangle fan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Primitive {
    /// Point list.
    Points,
    /// Line list.
    Lines,
    /// Line strip.
    LineStrip,
    /// Triangle list.
    Triangles,
    /// Triangle strip.
    TriangleStrip,
}

impl Primitive {
    /// Converts to the wgpu topology.
    #[inline]
    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            Primitive::Points => wgpu::PrimitiveTopology::PointList,
            Primitive::Lines => wgpu::PrimitiveTopology::LineList,
            Primitive::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Primitive::Triangles => wgpu::PrimitiveTopology::TriangleList,
            Primitive::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }

    /// Strip topologies need the index format baked into the pipeline.
    #[inline]
    pub fn is_strip(self) -> bool {
        matches!(self, Primitive::LineStrip | Primitive::TriangleStrip)
    }
}

/// One attribute binding of a draw object.
///
/// Whether the binding is *array* (per-vertex) or *singleton* (one constant
/// broadcast to every vertex) is not stated here: it is decided by how the
/// referenced buffer was created.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeBinding {
    /// Attribute name, matched against the program's attribute table.
    pub name: String,
    /// Id of the buffer holding the data.
    pub data_id: i32,
    /// Byte offset of the first element inside the buffer.
    pub offset: u32,
    /// Byte stride between consecutive vertices. `0` means tightly packed
    /// (`count * size_of(data_type)`).
    pub stride: u32,
    /// Elements per vertex (1-4, or 16 for the implicit instance transform).
    pub count: u32,
    /// Element type.
    pub data_type: DataType,
    /// Normalize integer data to `[0, 1]` / `[-1, 1]` floats.
    pub normalized: bool,
}

impl AttributeBinding {
    /// Creates a non-normalized binding.
    pub fn new(
        name: impl Into<String>,
        data_id: i32,
        offset: u32,
        stride: u32,
        count: u32,
        data_type: DataType,
    ) -> AttributeBinding {
        AttributeBinding {
            name: name.into(),
            data_id,
            offset,
            stride,
            count,
            data_type,
            normalized: false,
        }
    }

    /// The stride actually used for per-vertex layouts: a zero stride means
    /// tightly packed.
    #[inline]
    pub fn effective_stride(&self) -> u32 {
        if self.stride == 0 {
            self.count * self.data_type.size()
        } else {
            self.stride
        }
    }

    /// Checks wgpu's alignment rules for vertex buffer offsets and strides.
    pub(crate) fn validate_alignment(&self) -> Result<()> {
        if self.offset % 4 != 0 || self.effective_stride() % 4 != 0 {
            return Err(Error::MisalignedBinding {
                name: self.name.clone(),
                offset: self.offset,
                stride: self.effective_stride(),
            });
        }
        Ok(())
    }
}

/// Maps an element type/count/normalization triple onto a wgpu vertex format.
///
/// 8- and 16-bit formats only exist in two- and four-element widths.
pub fn vertex_format(
    data_type: DataType,
    count: u32,
    normalized: bool,
) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat::*;
    Some(match (data_type, count, normalized) {
        (DataType::Float, 1, _) => Float32,
        (DataType::Float, 2, _) => Float32x2,
        (DataType::Float, 3, _) => Float32x3,
        (DataType::Float, 4, _) => Float32x4,

        (DataType::Byte, 2, true) => Snorm8x2,
        (DataType::Byte, 4, true) => Snorm8x4,
        (DataType::Byte, 2, false) => Sint8x2,
        (DataType::Byte, 4, false) => Sint8x4,
        (DataType::UByte, 2, true) => Unorm8x2,
        (DataType::UByte, 4, true) => Unorm8x4,
        (DataType::UByte, 2, false) => Uint8x2,
        (DataType::UByte, 4, false) => Uint8x4,

        (DataType::Short, 2, true) => Snorm16x2,
        (DataType::Short, 4, true) => Snorm16x4,
        (DataType::Short, 2, false) => Sint16x2,
        (DataType::Short, 4, false) => Sint16x4,
        (DataType::UShort, 2, true) => Unorm16x2,
        (DataType::UShort, 4, true) => Unorm16x4,
        (DataType::UShort, 2, false) => Uint16x2,
        (DataType::UShort, 4, false) => Uint16x4,

        (DataType::Int, 1, false) => Sint32,
        (DataType::Int, 2, false) => Sint32x2,
        (DataType::Int, 3, false) => Sint32x3,
        (DataType::Int, 4, false) => Sint32x4,
        (DataType::UInt, 1, false) => Uint32,
        (DataType::UInt, 2, false) => Uint32x2,
        (DataType::UInt, 3, false) => Uint32x3,
        (DataType::UInt, 4, false) => Uint32x4,

        _ => return None,
    })
}

/// Rounds a byte size up to a 4-byte boundary, the packing granularity of
/// interleaved instance slots.
#[inline]
pub(crate) fn round_up_4(size: u32) -> u32 {
    size.div_ceil(4) * 4
}
