//! 骨骼层级、附加变换和 IK 求解器

mod ik_manager;
mod ik_solver;
mod manager;
mod node;

pub use ik_manager::IkManager;
pub use ik_solver::{IkLink, IkSolver};
pub use manager::NodeManager;
pub use node::{AppendBinding, Node};

use glam::{Mat4, Quat, Vec3};

/// 骨骼本地姿势（动作层每帧写入）
///
/// `translation` 是相对于骨骼初始位置的偏移，不包含骨骼本身的绑定偏移。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodePose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for NodePose {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl NodePose {
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self { translation, rotation }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }
}
