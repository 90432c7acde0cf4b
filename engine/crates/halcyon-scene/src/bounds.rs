//! 包围体与视锥体剔除
//!
//! 所有判定都是保守的：只有确定完全在某个平面外侧的物体才会被剔除。

use glam::{Mat4, Vec3, Vec4};
use halcyon_render_interface::gpu_types::GpuFrustumPlanes;

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// 点集为空时返回 None
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |aabb, p| Self::new(aabb.min.min(p), aabb.max.max(p))))
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// 变换 8 个角点后重新取 min/max
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let corners = self.corners().map(|c| transform.transform_point3(c));
        let mut aabb = Self::new(corners[0], corners[0]);
        for c in &corners[1..] {
            aabb.min = aabb.min.min(*c);
            aabb.max = aabb.max.max(*c);
        }
        aabb
    }
}

/// `dot(normal, p) + distance = 0`，法线指向平面内侧
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// 归一化 `(a, b, c, d)` 形式的平面
    pub fn from_vec4(v: Vec4) -> Self {
        let len = v.truncate().length();
        Self {
            normal: v.truncate() / len,
            distance: v.w / len,
        }
    }

    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.distance
    }

    #[inline]
    pub fn to_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.distance]
    }
}

/// 包围球
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundSphere {
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            center: aabb.center(),
            radius: aabb.half_extents().length(),
        }
    }

    /// 半径按最大的轴向缩放放大
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let scale = transform.x_axis.truncate().length().max(transform.y_axis.truncate().length()).max(
            transform.z_axis.truncate().length(),
        );
        Self {
            center: transform.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}

/// 剔除时使用的包围体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullShape {
    #[default]
    Aabb,
    Sphere,
}

/// 视锥体：left, right, bottom, top, near, far
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Gribb-Hartmann，要求投影矩阵的深度范围是 [0, 1]
    pub fn from_view_projection(m: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        Self {
            planes: [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(Plane::from_vec4),
        }
    }

    /// 世界空间 AABB：取沿法线方向最远的角点（p-vertex），在任一平面外侧即不可见
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let p_vertex = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            plane.signed_distance(p_vertex) >= 0.0
        })
    }

    pub fn intersects_sphere(&self, sphere: &BoundSphere) -> bool {
        self.planes.iter().all(|plane| plane.signed_distance(sphere.center) >= -sphere.radius)
    }

    /// 物体空间的包围盒经过 transform 后是否与视锥体相交
    pub fn is_visible(&self, transform: &Mat4, object_aabb: &Aabb, shape: CullShape) -> bool {
        match shape {
            CullShape::Aabb => self.intersects_aabb(&object_aabb.transformed(transform)),
            CullShape::Sphere => self.intersects_sphere(&BoundSphere::from_aabb(object_aabb).transformed(transform)),
        }
    }

    pub fn to_gpu(&self) -> GpuFrustumPlanes {
        self.planes.map(|p| p.to_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 位于原点、看向 -Z 的相机
    fn frustum() -> Frustum {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    fn unit_box() -> Aabb {
        Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))
    }

    #[test]
    fn planes_are_normalized() {
        for plane in frustum().planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn box_in_front_is_visible() {
        let t = Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0));
        assert!(frustum().is_visible(&t, &unit_box(), CullShape::Aabb));
    }

    #[test]
    fn box_behind_camera_is_culled() {
        let t = Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0));
        assert!(!frustum().is_visible(&t, &unit_box(), CullShape::Aabb));
    }

    #[test]
    fn box_far_to_the_side_is_culled() {
        let t = Mat4::from_translation(Vec3::new(50.0, 0.0, -10.0));
        assert!(!frustum().is_visible(&t, &unit_box(), CullShape::Aabb));
    }

    #[test]
    fn box_beyond_far_plane_is_culled() {
        let t = Mat4::from_translation(Vec3::new(0.0, 0.0, -200.0));
        assert!(!frustum().is_visible(&t, &unit_box(), CullShape::Aabb));
    }

    #[test]
    fn box_straddling_a_plane_is_kept() {
        // 中心在视锥外，但一部分伸进了视锥
        let edge = (30f32.to_radians()).tan() * 10.0;
        let t = Mat4::from_translation(Vec3::new(edge + 0.4, 0.0, -10.0));
        assert!(frustum().is_visible(&t, &unit_box(), CullShape::Aabb));
    }

    #[test]
    fn degenerate_box_is_a_point() {
        let point = Aabb::new(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, -5.0));
        assert!(frustum().is_visible(&Mat4::IDENTITY, &point, CullShape::Aabb));
        let outside = Aabb::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 5.0));
        assert!(!frustum().is_visible(&Mat4::IDENTITY, &outside, CullShape::Aabb));
    }

    #[test]
    fn rotation_grows_the_world_box() {
        let rotated = unit_box().transformed(&Mat4::from_rotation_y(45f32.to_radians()));
        assert!((rotated.max.x - 0.5 * 2f32.sqrt()).abs() < 1e-5);
        assert!((rotated.max.y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn sphere_is_never_tighter_than_box() {
        let f = frustum();
        for x in [-20.0, -8.0, -6.5, 0.0, 6.5, 8.0, 20.0] {
            let t = Mat4::from_translation(Vec3::new(x, 0.0, -10.0));
            if f.is_visible(&t, &unit_box(), CullShape::Aabb) {
                assert!(f.is_visible(&t, &unit_box(), CullShape::Sphere), "x = {x}");
            }
        }
    }

    #[test]
    fn sphere_scales_with_transform() {
        let sphere = BoundSphere::from_aabb(&unit_box()).transformed(&Mat4::from_scale(Vec3::new(1.0, 3.0, 1.0)));
        assert!((sphere.radius - 3.0 * 0.75f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn from_points() {
        assert_eq!(Aabb::from_points(std::iter::empty()), None);
        let aabb = Aabb::from_points([Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 3.0, 2.0)]).unwrap();
        assert_eq!(aabb, Aabb::new(Vec3::new(-1.0, -2.0, 0.0), Vec3::new(1.0, 3.0, 2.0)));
    }
}
