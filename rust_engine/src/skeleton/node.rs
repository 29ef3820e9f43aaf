//! 骨骼节点

use glam::{Mat4, Quat, Vec3};

use super::NodePose;

/// 附加变换绑定（付与親）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppendBinding {
    /// 附加源骨骼索引
    pub source: usize,
    pub rotate: bool,
    pub translate: bool,
    /// 为 true 时只采样源骨骼的动画姿势，忽略源骨骼自己的附加链
    pub local: bool,
    /// 附加权重，[0, 1]
    pub weight: f32,
}

/// 骨骼节点
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub parent: Option<usize>,
    /// 变形层级，遍历按该值非递减顺序进行
    pub deform_depth: i32,
    /// 是否在物理之后变形
    pub deform_after_physics: bool,

    // 初始位置（模型空间）
    pub initial_position: Vec3,
    // 相对于父骨骼的偏移（在 build_hierarchy 中计算）
    pub bone_offset: Vec3,
    // 逆绑定矩阵（在 build_hierarchy 中计算）
    pub inverse_bind_matrix: Mat4,

    // 附加变换
    pub append: Option<AppendBinding>,
    pub append_translate: Vec3,
    pub append_rotate: Quat,

    // IK（索引指向 IkManager 中的求解器，不拥有）
    pub ik_solver: Option<usize>,
    pub enable_ik: bool,
    pub ik_rotate: Quat,

    // 动画状态
    pub animation_translate: Vec3,
    pub animation_rotate: Quat,

    // 变换结果
    pub local_transform: Mat4,
    pub global_transform: Mat4,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            deform_depth: 0,
            deform_after_physics: false,
            initial_position: Vec3::ZERO,
            bone_offset: Vec3::ZERO,
            inverse_bind_matrix: Mat4::IDENTITY,
            append: None,
            append_translate: Vec3::ZERO,
            append_rotate: Quat::IDENTITY,
            ik_solver: None,
            enable_ik: false,
            ik_rotate: Quat::IDENTITY,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            local_transform: Mat4::IDENTITY,
            global_transform: Mat4::IDENTITY,
        }
    }

    pub fn is_append_rotate(&self) -> bool {
        self.append.is_some_and(|a| a.rotate)
    }

    pub fn is_append_translate(&self) -> bool {
        self.append.is_some_and(|a| a.translate)
    }

    pub fn has_append(&self) -> bool {
        self.append.is_some()
    }

    /// 当前动画姿势
    pub fn pose(&self) -> NodePose {
        NodePose::new(self.animation_translate, self.animation_rotate)
    }

    pub fn set_pose(&mut self, pose: NodePose) {
        self.animation_translate = pose.translation;
        self.animation_rotate = pose.rotation;
    }

    /// 帧开始：清除上一帧的动画姿势、IK 旋转和附加缓存
    pub fn begin_update(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
        self.ik_rotate = Quat::IDENTITY;
        self.append_translate = Vec3::ZERO;
        self.append_rotate = Quat::IDENTITY;
    }

    /// 更新本地变换
    ///
    /// 1. 平移 = bone_offset + animation_translate + append_translate
    /// 2. 旋转 = ik_rotate * animation_rotate * append_rotate
    pub fn update_local_transform(&mut self) {
        let mut translate = self.bone_offset + self.animation_translate;
        if self.is_append_translate() {
            translate += self.append_translate;
        }

        let mut rotation = self.animation_rotate;
        if self.enable_ik {
            rotation = self.ik_rotate * rotation;
        }
        if self.is_append_rotate() {
            rotation *= self.append_rotate;
        }

        self.local_transform = Mat4::from_rotation_translation(rotation, translate);
    }

    /// 蒙皮矩阵 = 当前全局变换 * 逆绑定矩阵
    pub fn skinning_matrix(&self) -> Mat4 {
        self.global_transform * self.inverse_bind_matrix
    }

    /// 全局位置
    pub fn global_position(&self) -> Vec3 {
        self.global_transform.w_axis.truncate()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new(String::new())
    }
}
