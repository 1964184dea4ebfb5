//! Procedural generation of the canonical primitive shapes.
//!
//! Each generator returns CPU-side mesh data; the scene cache uploads it
//! into internally-numbered buffers and caches it per resolution parameter.
//! Spheres, cylinders and cones interleave normal then position (six floats,
//! 24-byte stride); the disk is position-only and pairs with a constant
//! `(0, 1, 0)` normal.

use std::f32::consts::PI;

use crate::resource::DataType;
use crate::scene::Primitive;

/// Index data in the narrowest wgpu-supported width that fits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    /// 16-bit indices.
    U16(Vec<u16>),
    /// 32-bit indices.
    U32(Vec<u32>),
}

impl IndexData {
    fn from_u32(indices: Vec<u32>, vertex_count: usize) -> IndexData {
        if vertex_count <= u16::MAX as usize + 1 {
            IndexData::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            IndexData::U32(indices)
        }
    }

    /// Number of indices.
    pub fn len(&self) -> u32 {
        match self {
            IndexData::U16(v) => v.len() as u32,
            IndexData::U32(v) => v.len() as u32,
        }
    }

    /// Is the index list empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element type of the index data.
    pub fn data_type(&self) -> DataType {
        match self {
            IndexData::U16(_) => DataType::UShort,
            IndexData::U32(_) => DataType::UInt,
        }
    }

    /// The raw bytes, for buffer upload.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            IndexData::U16(v) => bytemuck::cast_slice(v).to_vec(),
            IndexData::U32(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }
}

/// Generated mesh data for one primitive shape.
#[derive(Clone, Debug)]
pub struct PrimitiveMesh {
    /// Vertex data; layout depends on the shape (see the module docs).
    pub vertices: Vec<f32>,
    /// Index data.
    pub indices: IndexData,
    /// Topology the shape draws with.
    pub primitive: Primitive,
}

/// Generates a unit sphere with roughly `num_vertices` vertices, as an
/// indexed triangle list of interleaved normal+position data.
pub fn sphere(num_vertices: u32) -> PrimitiveMesh {
    let bands = ((num_vertices as f32).sqrt().round() as u32).saturating_sub(1).max(4);
    let spokes = ((num_vertices as f32 / bands as f32).round() as u32)
        .saturating_sub(1)
        .max(4);

    let mut np = Vec::with_capacity(((bands + 1) * (spokes + 1) * 6) as usize);
    let mut indices = Vec::with_capacity((bands * spokes * 6) as usize);
    for i in 0..=bands {
        let theta = i as f32 * PI / bands as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();
        for j in 0..=spokes {
            let phi = j as f32 * 2.0 * PI / spokes as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let x = cos_phi * sin_theta;
            let y = cos_theta;
            let z = sin_phi * sin_theta;

            // On the unit sphere the normal equals the position.
            np.extend_from_slice(&[x, y, z, x, y, z]);

            if i < bands && j < spokes {
                let first = i * (spokes + 1) + j;
                let second = first + spokes + 1;
                indices.extend_from_slice(&[first, first + 1, second]);
                indices.extend_from_slice(&[second, first + 1, second + 1]);
            }
        }
    }

    let vertex_count = ((bands + 1) * (spokes + 1)) as usize;
    PrimitiveMesh {
        vertices: np,
        indices: IndexData::from_u32(indices, vertex_count),
        primitive: Primitive::Triangles,
    }
}

/// Generates an open unit cylinder along Y, from y = -1 to y = 1, as an
/// indexed triangle strip of interleaved normal+position data.
pub fn cylinder(num_spokes: u32) -> PrimitiveMesh {
    let mut np = vec![0.0f32; (num_spokes * 12) as usize];
    let mut indices = Vec::with_capacity((num_spokes * 2 + 2) as usize);
    for i in 0..num_spokes {
        let theta = 2.0 * PI * i as f32 / num_spokes as f32;
        let (z, x) = theta.sin_cos();
        let bottom = (i * 6) as usize;
        np[bottom..bottom + 6].copy_from_slice(&[x, 0.0, z, x, -1.0, z]);
        let top = ((i + num_spokes) * 6) as usize;
        np[top..top + 6].copy_from_slice(&[x, 0.0, z, x, 1.0, z]);
        indices.push(i);
        indices.push(i + num_spokes);
    }
    // Close the tube.
    indices.push(0);
    indices.push(num_spokes);

    PrimitiveMesh {
        vertices: np,
        indices: IndexData::from_u32(indices, (num_spokes * 2) as usize),
        primitive: Primitive::TriangleStrip,
    }
}

/// Generates a unit cone along Y with its apex at y = 1, as an indexed
/// triangle strip of interleaved normal+position data.
pub fn cone(num_spokes: u32) -> PrimitiveMesh {
    let mut np = vec![0.0f32; (num_spokes * 12) as usize];
    let mut indices = Vec::with_capacity((num_spokes * 2 + 2) as usize);
    for i in 0..num_spokes {
        let theta = 2.0 * PI * i as f32 / num_spokes as f32;
        let (z, x) = theta.sin_cos();
        let base = (i * 6) as usize;
        np[base..base + 6].copy_from_slice(&[x, 0.0, z, x, -1.0, z]);
        // The apex vertices reuse the rim normal so the silhouette shades
        // continuously around the cone.
        let apex = ((i + num_spokes) * 6) as usize;
        np[apex..apex + 6].copy_from_slice(&[x, 0.0, z, 0.0, 1.0, 0.0]);
        indices.push(i);
        indices.push(i + num_spokes);
    }
    indices.push(0);
    indices.push(num_spokes);

    PrimitiveMesh {
        vertices: np,
        indices: IndexData::from_u32(indices, (num_spokes * 2) as usize),
        primitive: Primitive::TriangleStrip,
    }
}

/// Generates a unit disk in the XZ plane facing +Y, as an indexed triangle
/// list of position-only data (the normal is a constant and is supplied as
/// a singleton attribute by the caller).
pub fn disk(num_spokes: u32) -> PrimitiveMesh {
    let mut positions = Vec::with_capacity(((num_spokes + 1) * 3) as usize);
    positions.extend_from_slice(&[0.0f32, 0.0, 0.0]);
    // Walk the rim clockwise so the front face points up.
    for i in 0..num_spokes {
        let theta = 2.0 * PI * (num_spokes - i) as f32 / num_spokes as f32;
        let (z, x) = theta.sin_cos();
        positions.extend_from_slice(&[x, 0.0, z]);
    }

    let mut indices = Vec::with_capacity((num_spokes * 3) as usize);
    for i in 0..num_spokes {
        let next = 1 + (i + 1) % num_spokes;
        indices.extend_from_slice(&[0, i + 1, next]);
    }

    PrimitiveMesh {
        vertices: positions,
        indices: IndexData::from_u32(indices, (num_spokes + 1) as usize),
        primitive: Primitive::Triangles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_interleaves_unit_normals() {
        let mesh = sphere(300);
        assert_eq!(mesh.primitive, Primitive::Triangles);
        assert_eq!(mesh.vertices.len() % 6, 0);
        for v in mesh.vertices.chunks_exact(6) {
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((n - 1.0).abs() < 1e-5);
            // Normal equals position on the unit sphere.
            assert_eq!(&v[0..3], &v[3..6]);
        }
        let vertex_count = (mesh.vertices.len() / 6) as u32;
        match &mesh.indices {
            IndexData::U16(idx) => assert!(idx.iter().all(|i| u32::from(*i) < vertex_count)),
            IndexData::U32(idx) => assert!(idx.iter().all(|i| *i < vertex_count)),
        }
    }

    #[test]
    fn cylinder_strip_wraps_around() {
        let mesh = cylinder(50);
        assert_eq!(mesh.primitive, Primitive::TriangleStrip);
        assert_eq!(mesh.vertices.len(), 50 * 12);
        assert_eq!(mesh.indices.len(), 102);
        assert_eq!(mesh.indices.data_type(), DataType::UShort);
        let IndexData::U16(idx) = &mesh.indices else {
            panic!("50 spokes fit in 16-bit indices")
        };
        // The strip closes by revisiting the first bottom/top pair.
        assert_eq!(idx[100], 0);
        assert_eq!(idx[101], 50);
    }

    #[test]
    fn cone_apex_sits_on_the_axis() {
        let mesh = cone(50);
        for v in mesh.vertices.chunks_exact(6).skip(50) {
            assert_eq!(&v[3..6], &[0.0, 1.0, 0.0]);
        }
    }

    #[test]
    fn disk_triangulates_the_fan() {
        let mesh = disk(50);
        assert_eq!(mesh.primitive, Primitive::Triangles);
        // Center plus rim.
        assert_eq!(mesh.vertices.len(), 51 * 3);
        assert_eq!(&mesh.vertices[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(mesh.indices.len(), 150);
        let IndexData::U16(idx) = &mesh.indices else {
            panic!("fits in 16-bit indices")
        };
        // Every triangle starts at the center and stays on the rim.
        for tri in idx.chunks_exact(3) {
            assert_eq!(tri[0], 0);
            assert!(tri[1] >= 1 && tri[2] >= 1);
        }
    }
}
