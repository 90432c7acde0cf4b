use std::sync::{Arc, Mutex};

use glam::{Mat4, Vec3};

use crate::bounds::Frustum;

/// 渲染器需要的相机信息
pub trait CameraSource {
    fn view_projection(&self) -> Mat4;

    fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}

/// 欧拉角控制的透视相机
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,

    pub euler_yaw_deg: f32,
    pub euler_pitch_deg: f32,

    pub fov_y_deg: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl PerspectiveCamera {
    /// 相机的上参考向量
    const CAMERA_UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);

    /// YXZ 表示 Y(yaw)-X(Pitch)-Z(Roll) 的旋转顺序
    const CAMERA_EULER: glam::EulerRot = glam::EulerRot::YXZ;

    /// 没有旋转的情况下，相机看向的是 -Z
    const CAMERA_FORWARD: Vec3 = Vec3::new(0.0, 0.0, -1.0);

    const CAMERA_RIGHT: Vec3 = Vec3::new(1.0, 0.0, 0.0);

    const K_PITCH: f32 = 89.5;

    #[inline]
    fn rotation(&self) -> Mat4 {
        Mat4::from_euler(Self::CAMERA_EULER, self.euler_yaw_deg.to_radians(), self.euler_pitch_deg.to_radians(), 0.0)
    }

    pub fn camera_forward(&self) -> Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_FORWARD)
    }

    pub fn camera_right(&self) -> Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_RIGHT)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.camera_forward(), Self::CAMERA_UP)
    }

    /// 深度范围 [0, 1]
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_deg.to_radians(), self.aspect, self.near, self.far)
    }

    /// 朝相机看向的方向进行移动
    pub fn move_forward(&mut self, length: f32) {
        self.position += self.camera_forward() * length;
    }

    pub fn move_right(&mut self, length: f32) {
        self.position += self.camera_right() * length;
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.euler_yaw_deg = (self.euler_yaw_deg + angle).rem_euclid(360.0);
    }

    pub fn rotate_pitch(&mut self, angle: f32) {
        self.euler_pitch_deg = (self.euler_pitch_deg + angle).clamp(-Self::K_PITCH, Self::K_PITCH);
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            euler_yaw_deg: 0.0,
            euler_pitch_deg: 0.0,
            fov_y_deg: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraSource for PerspectiveCamera {
    fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// 一帧内使用的相机数据
#[derive(Debug, Clone, Copy)]
pub struct CameraSnapshot {
    pub view_projection: Mat4,
    pub frustum: Frustum,
}

/// 跨线程共享的相机，渲染线程每帧取一次快照
#[derive(Clone, Default)]
pub struct SharedCamera(Arc<Mutex<PerspectiveCamera>>);

impl SharedCamera {
    pub fn new(camera: PerspectiveCamera) -> Self {
        Self(Arc::new(Mutex::new(camera)))
    }

    pub fn update(&self, f: impl FnOnce(&mut PerspectiveCamera)) {
        f(&mut self.0.lock().unwrap());
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        let camera = *self.0.lock().unwrap();
        CameraSnapshot {
            view_projection: camera.view_projection(),
            frustum: camera.frustum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = PerspectiveCamera::default();
        assert!((camera.camera_forward() - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn yaw_wraps_and_pitch_clamps() {
        let mut camera = PerspectiveCamera::default();
        camera.rotate_yaw(-90.0);
        assert!((camera.euler_yaw_deg - 270.0).abs() < 1e-4);
        camera.rotate_pitch(120.0);
        assert_eq!(camera.euler_pitch_deg, 89.5);
    }

    #[test]
    fn snapshot_sees_updates_from_other_threads() {
        let shared = SharedCamera::new(PerspectiveCamera::default());
        let writer = shared.clone();
        std::thread::spawn(move || writer.update(|c| c.position = Vec3::new(0.0, 0.0, 100.0))).join().unwrap();

        // 相机移到了 z = 100，原点处的点现在在前方 100 处，仍在视锥内
        let snapshot = shared.snapshot();
        let origin = crate::bounds::Aabb::new(Vec3::ZERO, Vec3::ZERO);
        assert!(snapshot.frustum.intersects_aabb(&origin));
        let behind = crate::bounds::Aabb::new(Vec3::new(0.0, 0.0, 150.0), Vec3::new(0.0, 0.0, 150.0));
        assert!(!snapshot.frustum.intersects_aabb(&behind));
    }
}
