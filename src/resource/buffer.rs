//! Wrapper for a wgpu buffer object with lazy upload.

use crate::context::Context;

/// Element types accepted by attribute bindings and index buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    /// Signed 8-bit integer.
    Byte,
    /// Unsigned 8-bit integer.
    UByte,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// 32-bit IEEE float.
    Float,
}

impl DataType {
    /// Size of one element of this type, in bytes.
    #[inline]
    pub fn size(self) -> u32 {
        match self {
            DataType::Byte | DataType::UByte => 1,
            DataType::Short | DataType::UShort => 2,
            DataType::Int | DataType::UInt | DataType::Float => 4,
        }
    }

    /// The wgpu index format for this element type, if one exists.
    #[inline]
    pub fn index_format(self) -> Option<wgpu::IndexFormat> {
        match self {
            DataType::UShort => Some(wgpu::IndexFormat::Uint16),
            DataType::UInt => Some(wgpu::IndexFormat::Uint32),
            _ => None,
        }
    }
}

/// Type of gpu buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BufferTarget {
    /// A vertex buffer (bindable as vertex data).
    Array,
    /// An index buffer (bindable as index data).
    ElementArray,
}

impl BufferTarget {
    /// Converts to wgpu buffer usages.
    #[inline]
    pub fn to_wgpu(self) -> wgpu::BufferUsages {
        match self {
            BufferTarget::Array => wgpu::BufferUsages::VERTEX,
            BufferTarget::ElementArray => wgpu::BufferUsages::INDEX,
        }
    }
}

/// A block of bytes that can live on the RAM, on the GPU, or both.
///
/// Registry buffers and the buffers synthesized for instancing are created
/// on the RAM and uploaded on first use by a traversal. Buffers created
/// through the singleton path keep their CPU shadow forever: it is the data
/// interleaved into per-instance buffers by the group optimizer. Plain
/// array/index buffers release their shadow once uploaded.
#[derive(Debug)]
pub struct DeviceBuffer {
    target: BufferTarget,
    singleton: bool,
    len: u64,
    buffer: Option<wgpu::Buffer>,
    data: Option<Vec<u8>>,
}

impl DeviceBuffer {
    /// Creates a new `DeviceBuffer` that is not yet uploaded to the GPU.
    pub fn from_data(target: BufferTarget, data: Vec<u8>) -> DeviceBuffer {
        DeviceBuffer {
            target,
            singleton: false,
            len: data.len() as u64,
            buffer: None,
            data: Some(data),
        }
    }

    /// Creates a singleton buffer: one constant value, re-readable on the CPU.
    pub fn singleton(data: Vec<u8>) -> DeviceBuffer {
        DeviceBuffer {
            target: BufferTarget::Array,
            singleton: true,
            len: data.len() as u64,
            buffer: None,
            data: Some(data),
        }
    }

    /// The buffer target kind this buffer was created with.
    #[inline]
    pub fn target(&self) -> BufferTarget {
        self.target
    }

    /// Returns `true` if this buffer was created through the singleton path.
    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// The byte length of this buffer.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Is this buffer empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The CPU shadow copy, if still available.
    #[inline]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Returns `true` if this buffer is already uploaded to the GPU.
    #[inline]
    pub fn is_on_gpu(&self) -> bool {
        self.buffer.is_some()
    }

    /// Returns the wgpu buffer if it has been uploaded.
    #[inline]
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    /// Loads the bytes from the RAM to the GPU.
    ///
    /// Non-singleton buffers release their CPU shadow afterwards. Empty
    /// buffers are never uploaded (wgpu rejects zero-sized bindings).
    pub fn load_to_gpu(&mut self, ctxt: &Context) {
        if self.buffer.is_some() {
            return;
        }

        if let Some(ref data) = self.data {
            if data.is_empty() {
                return;
            }

            let buffer = ctxt.create_buffer_init(
                Some("batch3d buffer"),
                data,
                self.target.to_wgpu() | wgpu::BufferUsages::COPY_DST,
            );
            self.buffer = Some(buffer);
        }

        if !self.singleton {
            self.data = None;
        }
    }

    /// Ensures the buffer is on the GPU and returns a reference to it.
    ///
    /// Returns `None` if the data is empty.
    #[inline]
    pub fn ensure_on_gpu(&mut self, ctxt: &Context) -> Option<&wgpu::Buffer> {
        self.load_to_gpu(ctxt);
        self.buffer.as_ref()
    }
}
