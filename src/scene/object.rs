//! Drawable objects and the resolution of their attribute bindings.

use std::collections::HashMap;

use crate::resource::{DataType, DeviceBuffer, ProgramInterface};
use crate::scene::attribute::{round_up_4, AttributeBinding, Primitive};

bitflags! {
    /// Mutable state flags of a draw object.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ObjectFlags: u8 {
        /// Excluded from rendering and picking, but still registered.
        const HIDDEN      = 1 << 0;
        /// Partitioned separately from opaque objects.
        const TRANSPARENT = 1 << 1;
        /// A referenced resource is missing; skipped at render time.
        const INCOMPLETE  = 1 << 2;
    }
}

/// An index buffer reference: the buffer plus its element type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexBinding {
    /// Id of the index buffer.
    pub data_id: i32,
    /// Element type; must be [`DataType::UShort`] or [`DataType::UInt`].
    pub data_type: DataType,
}

/// The declarative description of a draw object, as supplied by the caller.
#[derive(Clone, Debug)]
pub struct ObjectDesc {
    /// The shader program drawing this object.
    pub program_id: i32,
    /// The instance transform; 0 is the identity.
    pub matrix_id: i32,
    /// Attribute bindings, array or singleton.
    pub attributes: Vec<AttributeBinding>,
    /// Primitive topology.
    pub primitive: Primitive,
    /// First vertex (or first index when an index buffer is present).
    pub first: u32,
    /// Number of vertices (or indices) to draw.
    pub count: u32,
    /// Optional index buffer.
    pub index: Option<IndexBinding>,
}

/// An attribute binding resolved to per-vertex data.
#[derive(Clone, Debug)]
pub struct ArrayAttribute {
    /// The original binding.
    pub binding: AttributeBinding,
    /// Base shader location in the draw program.
    pub location: u32,
    /// Locations occupied (more than one for matrix attributes).
    pub num_locations: u32,
}

/// An attribute binding resolved to a per-object constant.
///
/// The value itself is not copied here: singleton buffers keep their CPU
/// shadow, and the group optimizer re-reads it whenever it interleaves
/// instance data. Re-creating the buffer (matrix updates do this) is
/// therefore observed without re-registering the object.
#[derive(Clone, Debug)]
pub struct SingletonValue {
    /// Id of the singleton buffer holding the value.
    pub data_id: i32,
    /// Element type of the binding.
    pub data_type: DataType,
    /// Normalize integer data when read as a vertex attribute.
    pub normalized: bool,
    /// Base shader location in the draw program.
    pub base_location: u32,
    /// Location in the pick program, when it declares this attribute.
    pub pick_location: Option<u32>,
    /// Locations occupied.
    pub num_locations: u32,
    /// Elements per location, from the shader type.
    pub num_elements: u32,
}

impl SingletonValue {
    /// Bytes this value occupies in an interleaved instance slot, rounded up
    /// to a 4-byte boundary.
    #[inline]
    pub fn slot_size(&self) -> u32 {
        round_up_4(self.num_locations * self.num_elements * self.data_type.size())
    }
}

/// A registered draw object with its bindings resolved against its program.
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub(crate) program_id: i32,
    pub(crate) matrix_id: i32,
    /// Array bindings active in the program, sorted by attribute name.
    pub(crate) arrays: Vec<ArrayAttribute>,
    /// Singleton values, sorted by draw location.
    pub(crate) singletons: Vec<SingletonValue>,
    pub(crate) primitive: Primitive,
    pub(crate) first: u32,
    pub(crate) count: u32,
    pub(crate) index: Option<IndexBinding>,
    pub(crate) flags: ObjectFlags,
}

impl ObjectInfo {
    /// Is this object currently hidden?
    #[inline]
    pub fn hidden(&self) -> bool {
        self.flags.contains(ObjectFlags::HIDDEN)
    }

    /// Is this object flagged transparent?
    #[inline]
    pub fn transparent(&self) -> bool {
        self.flags.contains(ObjectFlags::TRANSPARENT)
    }

    /// Is this object missing a resource it needs to draw?
    #[inline]
    pub fn incomplete(&self) -> bool {
        self.flags.contains(ObjectFlags::INCOMPLETE)
    }

    /// The matrix id this object was created with.
    #[inline]
    pub fn matrix_id(&self) -> i32 {
        self.matrix_id
    }

    /// Does any binding or the index buffer reference `data_id`?
    pub(crate) fn references_buffer(&self, data_id: i32) -> bool {
        self.arrays.iter().any(|a| a.binding.data_id == data_id)
            || self.singletons.iter().any(|s| s.data_id == data_id)
            || self.index.is_some_and(|ib| ib.data_id == data_id)
    }
}

/// Resolves a desc's bindings against the program's attribute table.
///
/// Walks every attribute the program declares: a missing binding or a
/// missing buffer marks the object incomplete (it stays registered but is
/// skipped by traversals). Bindings the program does not declare are
/// ignored. Classification is data-driven: a binding is a singleton exactly
/// when its buffer was created through the singleton path.
pub(crate) fn resolve_attributes(
    object_id: i32,
    bindings: &[AttributeBinding],
    program: &ProgramInterface,
    pick: Option<&ProgramInterface>,
    buffers: &HashMap<i32, DeviceBuffer>,
) -> (Vec<ArrayAttribute>, Vec<SingletonValue>, bool) {
    let mut arrays = Vec::new();
    let mut singletons = Vec::new();
    let mut incomplete = false;

    for attr in &program.attributes {
        let Some(binding) = bindings.iter().find(|b| b.name == attr.name) else {
            log::warn!(
                "object {}: missing attribute `{}` required by its program",
                object_id,
                attr.name
            );
            incomplete = true;
            continue;
        };

        let Some(buffer) = buffers.get(&binding.data_id) else {
            log::warn!(
                "object {}: missing buffer {} for attribute `{}`",
                object_id,
                binding.data_id,
                attr.name
            );
            incomplete = true;
            continue;
        };

        let (num_locations, num_elements) = attr.ty.location_info();
        if buffer.is_singleton() {
            singletons.push(SingletonValue {
                data_id: binding.data_id,
                data_type: binding.data_type,
                normalized: binding.normalized,
                base_location: attr.location,
                pick_location: pick
                    .and_then(|p| p.attribute(&attr.name))
                    .map(|a| a.location),
                num_locations,
                num_elements,
            });
        } else {
            arrays.push(ArrayAttribute {
                binding: binding.clone(),
                location: attr.location,
                num_locations,
            });
        }
    }

    arrays.sort_by(|a, b| a.binding.name.cmp(&b.binding.name));
    singletons.sort_by_key(|s| s.base_location);

    (arrays, singletons, incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{AttributeDecl, BufferTarget, ShaderType};

    fn program(attrs: &[(&str, u32, ShaderType)]) -> ProgramInterface {
        let decls: Vec<_> = attrs
            .iter()
            .map(|(name, location, ty)| AttributeDecl {
                name: name.to_string(),
                location: *location,
                ty: *ty,
            })
            .collect();
        ProgramInterface::new(&decls, &[])
    }

    fn buffers(entries: &[(i32, bool)]) -> HashMap<i32, DeviceBuffer> {
        entries
            .iter()
            .map(|(id, singleton)| {
                let buf = if *singleton {
                    DeviceBuffer::singleton(vec![0u8; 12])
                } else {
                    DeviceBuffer::from_data(BufferTarget::Array, vec![0u8; 128])
                };
                (*id, buf)
            })
            .collect()
    }

    #[test]
    fn classification_follows_the_buffer() {
        let program = program(&[
            ("position", 0, ShaderType::FVec3),
            ("color", 1, ShaderType::FVec3),
        ]);
        let buffers = buffers(&[(1, false), (2, true)]);
        let bindings = vec![
            AttributeBinding::new("color", 2, 0, 0, 3, DataType::Float),
            AttributeBinding::new("position", 1, 0, 0, 3, DataType::Float),
        ];

        let (arrays, singletons, incomplete) =
            resolve_attributes(9, &bindings, &program, None, &buffers);

        assert!(!incomplete);
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].binding.name, "position");
        assert_eq!(singletons.len(), 1);
        assert_eq!(singletons[0].base_location, 1);
        assert_eq!(singletons[0].data_id, 2);
    }

    #[test]
    fn missing_binding_marks_incomplete() {
        let program = program(&[
            ("position", 0, ShaderType::FVec3),
            ("normal", 1, ShaderType::FVec3),
        ]);
        let buffers = buffers(&[(1, false)]);
        let bindings = vec![AttributeBinding::new("position", 1, 0, 0, 3, DataType::Float)];

        let (arrays, _, incomplete) = resolve_attributes(9, &bindings, &program, None, &buffers);
        assert!(incomplete);
        // The resolvable part is still resolved.
        assert_eq!(arrays.len(), 1);
    }

    #[test]
    fn missing_buffer_marks_incomplete() {
        let program = program(&[("position", 0, ShaderType::FVec3)]);
        let buffers = buffers(&[]);
        let bindings = vec![AttributeBinding::new("position", 1, 0, 0, 3, DataType::Float)];

        let (_, _, incomplete) = resolve_attributes(9, &bindings, &program, None, &buffers);
        assert!(incomplete);
    }

    #[test]
    fn undeclared_bindings_are_ignored() {
        let program = program(&[("position", 0, ShaderType::FVec3)]);
        let buffers = buffers(&[(1, false), (2, false)]);
        let bindings = vec![
            AttributeBinding::new("position", 1, 0, 0, 3, DataType::Float),
            AttributeBinding::new("leftover", 2, 0, 0, 4, DataType::Float),
        ];

        let (arrays, singletons, incomplete) =
            resolve_attributes(9, &bindings, &program, None, &buffers);
        assert!(!incomplete);
        assert_eq!(arrays.len(), 1);
        assert!(singletons.is_empty());
    }

    #[test]
    fn singletons_sort_by_location_and_resolve_pick() {
        let program = program(&[
            ("instanceTransform", 2, ShaderType::Mat4x4),
            ("color", 1, ShaderType::FVec4),
        ]);
        let pick = program_with_pick();
        let mut buffers = buffers(&[(2, true)]);
        buffers.insert(3, DeviceBuffer::singleton(vec![0u8; 64]));
        let bindings = vec![
            AttributeBinding::new("instanceTransform", 3, 0, 0, 16, DataType::Float),
            AttributeBinding::new("color", 2, 0, 0, 4, DataType::Float),
        ];

        let (_, singletons, incomplete) =
            resolve_attributes(9, &bindings, &program, Some(&pick), &buffers);
        assert!(!incomplete);
        assert_eq!(singletons.len(), 2);
        assert_eq!(singletons[0].base_location, 1);
        assert_eq!(singletons[1].base_location, 2);
        // The pick program only declares the transform.
        assert_eq!(singletons[0].pick_location, None);
        assert_eq!(singletons[1].pick_location, Some(2));
        // A mat4 singleton spans four locations of four floats: 64 bytes.
        assert_eq!(singletons[1].slot_size(), 64);
    }

    fn program_with_pick() -> ProgramInterface {
        program(&[("instanceTransform", 2, ShaderType::Mat4x4)])
    }
}
