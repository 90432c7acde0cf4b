//! 资源导入的接口
//!
//! 真正的模型文件解析不在渲染核心中，这里只定义导入结果的形状，并提供程序化生成的几何体。

use glam::Vec3;
use halcyon_render_interface::{gpu_types::VertexPosNormalUv, handles::ResourceIdentity};
use itertools::Itertools;

use crate::bounds::Aabb;

/// 导入后的一个 mesh，顶点数据是紧密排列的字节
#[derive(Debug, Clone)]
pub struct ImportedMesh {
    pub vertices: Vec<u8>,
    pub vertex_stride: u32,
    pub indices: Vec<u32>,
    pub bound_box: Aabb,
    /// `AssetImporter::materials` 中的下标
    pub material: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ImportedMaterial {
    /// (用途, 纹理资源)，例如 ("albedo", ..)
    pub textures: Vec<(String, ResourceIdentity)>,
    /// (名称, 数值)，例如 ("roughness", 0.5)
    pub factors: Vec<(String, f32)>,
}

pub trait AssetImporter {
    fn meshes(&self) -> Vec<ImportedMesh>;
    fn materials(&self) -> Vec<ImportedMaterial>;
}

/// 边长为 size、中心在原点的立方体，每个面 4 个顶点
pub fn cube_mesh(size: f32) -> ImportedMesh {
    let h = size * 0.5;
    // (法线, 切向 u, 切向 v)
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let pos = (normal + u * su + v * sv) * h;
            vertices.push(VertexPosNormalUv {
                pos: pos.to_array(),
                normal: normal.to_array(),
                uv: [(su + 1.0) * 0.5, (sv + 1.0) * 0.5],
            });
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    let bound_box = Aabb::from_points(vertices.iter().map(|v| Vec3::from(v.pos))).unwrap_or_default();
    ImportedMesh {
        vertices: bytemuck::cast_slice(&vertices).to_vec(),
        vertex_stride: VertexPosNormalUv::STRIDE,
        indices,
        bound_box,
        material: 0,
    }
}

/// 程序化生成的场景资源：若干不同大小的立方体，共用一个材质
pub struct ProceduralImporter {
    pub cube_sizes: Vec<f32>,
}

impl AssetImporter for ProceduralImporter {
    fn meshes(&self) -> Vec<ImportedMesh> {
        self.cube_sizes.iter().map(|size| cube_mesh(*size)).collect_vec()
    }

    fn materials(&self) -> Vec<ImportedMaterial> {
        vec![ImportedMaterial {
            textures: Vec::new(),
            factors: vec![("roughness".to_string(), 0.5), ("metallic".to_string(), 0.0)],
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_outward_counter_clockwise_faces() {
        let cube = cube_mesh(2.0);
        let vertices: &[VertexPosNormalUv] = bytemuck::cast_slice(&cube.vertices);
        assert_eq!(vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.bound_box, Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)));

        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(vertices[i as usize].pos));
            let face_normal = (b - a).cross(c - a).normalize();
            assert!((face_normal - Vec3::from(vertices[tri[0] as usize].normal)).length() < 1e-5);
        }
    }

    #[test]
    fn procedural_importer() {
        let importer = ProceduralImporter {
            cube_sizes: vec![1.0, 3.0],
        };
        let meshes = importer.meshes();
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[1].bound_box.max, Vec3::splat(1.5));
        assert_eq!(importer.materials()[0].factors.len(), 2);
    }
}
