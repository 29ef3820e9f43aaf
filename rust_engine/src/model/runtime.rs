//! MMD 运行时模型

use glam::{Vec2, Vec3};

use crate::animation::MotionSource;
use crate::morph::MorphDeformer;
use crate::physics::{PhysicsDriver, PhysicsOverride};
use crate::skeleton::{IkManager, NodeManager, NodePose};
use crate::skinning::{compute_skinning, SkinningContext, SkinningInput, SkinningOutput, VertexBoneInfo};

use super::{IndexBuffer, MmdMaterial, SubMesh};

/// MMD 运行时模型
///
/// 每帧流程：
/// `begin_animation` → 动作层写入姿势 → `end_animation` → `update_animation` → `update`
pub struct MmdModel {
    // 静态数据（加载后不再修改）
    name: String,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    uvs: Vec<Vec2>,
    bone_infos: Vec<VertexBoneInfo>,
    indices: IndexBuffer,
    materials: Vec<MmdMaterial>,
    submeshes: Vec<SubMesh>,
    bbox_min: Vec3,
    bbox_max: Vec3,

    // 运行时数据
    morph_offsets: Vec<Vec3>,
    update_positions: Vec<Vec3>,
    update_normals: Vec<Vec3>,

    // 子系统
    node_manager: NodeManager,
    ik_manager: IkManager,
    morph: Option<Box<dyn MorphDeformer>>,

    // 物理系统
    physics: Option<Box<dyn PhysicsDriver>>,
    physics_enabled: bool,
    physics_overrides: Vec<PhysicsOverride>,

    skinning: SkinningContext,
    ik_enabled: bool,
    in_animation: bool,
    debug_logged: bool,
}

impl MmdModel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        uvs: Vec<Vec2>,
        bone_infos: Vec<VertexBoneInfo>,
        indices: IndexBuffer,
        materials: Vec<MmdMaterial>,
        submeshes: Vec<SubMesh>,
        node_manager: NodeManager,
        ik_manager: IkManager,
        skinning: SkinningContext,
        ik_enabled: bool,
    ) -> Self {
        let (bbox_min, bbox_max) = if positions.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            positions.iter().fold(
                (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                |(min, max), p| (min.min(*p), max.max(*p)),
            )
        };
        let vertex_count = positions.len();

        Self {
            name,
            update_positions: positions.clone(),
            update_normals: normals.clone(),
            positions,
            normals,
            uvs,
            bone_infos,
            indices,
            materials,
            submeshes,
            bbox_min,
            bbox_max,
            morph_offsets: vec![Vec3::ZERO; vertex_count],
            node_manager,
            ik_manager,
            morph: None,
            physics: None,
            physics_enabled: false,
            physics_overrides: Vec::new(),
            skinning,
            ik_enabled,
            in_animation: false,
            debug_logged: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取顶点数量
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    /// 蒙皮后的顶点位置
    pub fn update_positions(&self) -> &[Vec3] {
        &self.update_positions
    }

    /// 蒙皮后的顶点法线
    pub fn update_normals(&self) -> &[Vec3] {
        &self.update_normals
    }

    /// UV 不参与蒙皮，与原始 UV 相同
    pub fn update_uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    pub fn bone_infos(&self) -> &[VertexBoneInfo] {
        &self.bone_infos
    }

    pub fn indices(&self) -> &IndexBuffer {
        &self.indices
    }

    /// 获取索引数量
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn index_element_size(&self) -> usize {
        self.indices.element_size()
    }

    /// 获取材质数量
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn materials(&self) -> &[MmdMaterial] {
        &self.materials
    }

    /// 获取子网格数量
    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    pub fn submeshes(&self) -> &[SubMesh] {
        &self.submeshes
    }

    pub fn bbox_min(&self) -> Vec3 {
        self.bbox_min
    }

    pub fn bbox_max(&self) -> Vec3 {
        self.bbox_max
    }

    pub fn node_manager(&self) -> &NodeManager {
        &self.node_manager
    }

    pub fn ik_manager(&self) -> &IkManager {
        &self.ik_manager
    }

    /// 启用/禁用 IK 求解器
    pub fn set_ik_enabled(&mut self, index: usize, enabled: bool) {
        self.ik_manager.set_enabled(index, enabled);
    }

    /// 按名称启用/禁用 IK 求解器，返回是否找到
    pub fn set_ik_enabled_by_name(&mut self, name: &str, enabled: bool) -> bool {
        self.ik_manager.set_enabled_by_name(name, enabled)
    }

    /// 当前帧 Morph 位置偏移
    pub fn morph_offsets(&self) -> &[Vec3] {
        &self.morph_offsets
    }

    pub fn set_morph_deformer(&mut self, morph: Box<dyn MorphDeformer>) {
        self.morph = Some(morph);
    }

    // ========== 动画流程 ==========

    /// 初始化动画状态：回到绑定姿势并计算初始全局变换
    pub fn initialize_animation(&mut self) {
        self.node_manager.begin_update();
        self.morph_offsets.fill(Vec3::ZERO);
        self.ik_manager.set_all_enabled(self.ik_enabled);

        self.node_manager.update_transforms(&self.ik_manager, false);
        self.node_manager.update_transforms(&self.ik_manager, true);
        self.node_manager.update_skinning_matrices();

        self.in_animation = false;
        self.reset_physics();
    }

    /// 开始动画帧，之后动作层可以写入骨骼姿势
    pub fn begin_animation(&mut self) {
        if self.in_animation {
            log::warn!("begin_animation 重复调用，上一帧没有 end_animation");
        }
        self.node_manager.begin_update();
        self.morph_offsets.fill(Vec3::ZERO);
        self.in_animation = true;
    }

    /// 结束动画帧，骨骼 Morph 在这里叠加到动作层姿势上（每帧一次）
    pub fn end_animation(&mut self) {
        if !self.in_animation {
            log::warn!("end_animation 调用时没有对应的 begin_animation");
            return;
        }
        if let Some(morph) = self.morph.as_mut() {
            morph.apply_node_offsets(&mut self.node_manager);
        }
        self.in_animation = false;
    }

    /// 是否处于 begin_animation / end_animation 之间
    pub fn is_in_animation(&self) -> bool {
        self.in_animation
    }

    /// 设置骨骼姿势（动作层）
    pub fn set_node_pose(&mut self, index: usize, pose: NodePose) {
        if !self.in_animation {
            log::warn!("在动画帧外修改骨骼 {} 的姿势", index);
        }
        self.node_manager.set_node_pose(index, pose);
    }

    /// 更新骨骼动画：顶点 Morph → 物理前骨骼 → 物理 → 物理后骨骼
    ///
    /// 不修改动作层姿势，重复调用结果相同。
    pub fn update_animation(&mut self, elapsed: f32) {
        self.morph_offsets.fill(Vec3::ZERO);
        if let Some(morph) = self.morph.as_mut() {
            morph.apply_vertex_offsets(&mut self.morph_offsets);
        }

        self.node_manager.update_transforms(&self.ik_manager, false);
        self.update_physics(elapsed);
        self.node_manager.update_transforms(&self.ik_manager, true);

        self.node_manager.update_skinning_matrices();
    }

    /// 更新顶点（蒙皮计算）
    ///
    /// 蒙皮只依赖当前姿势，`elapsed` 不参与计算。
    pub fn update(&mut self, _elapsed: f32) {
        let input = SkinningInput {
            positions: &self.positions,
            normals: &self.normals,
            morph_offsets: &self.morph_offsets,
            bone_infos: &self.bone_infos,
            bone_matrices: self.node_manager.skinning_matrices(),
        };
        let output = SkinningOutput {
            positions: &mut self.update_positions,
            normals: &mut self.update_normals,
        };
        compute_skinning(&self.skinning, &input, output);

        if !self.debug_logged {
            self.debug_logged = true;
            log::debug!(
                "模型 '{}' 首次蒙皮: vertex_count={}, parallel={}",
                self.name,
                self.positions.len(),
                self.positions.len() >= self.skinning.parallel_threshold,
            );
        }
    }

    /// 完整动画更新流程
    pub fn update_all_animation(&mut self, motion: Option<&dyn MotionSource>, frame: f32, elapsed: f32) {
        self.begin_animation();
        if let Some(motion) = motion {
            motion.evaluate(frame, &mut self.node_manager);
        }
        self.end_animation();

        self.update_animation(elapsed);
        self.update(elapsed);
    }

    // ========== 物理系统方法 ==========

    /// 挂接物理模拟器并启用
    pub fn set_physics(&mut self, mut physics: Box<dyn PhysicsDriver>) {
        physics.reset(&self.node_manager);
        self.physics = Some(physics);
        self.physics_enabled = true;
        log::info!("模型 '{}' 已挂接物理模拟", self.name);
    }

    /// 重置物理系统
    pub fn reset_physics(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            physics.reset(&self.node_manager);
        }
    }

    /// 启用/禁用物理
    pub fn set_physics_enabled(&mut self, enabled: bool) {
        self.physics_enabled = enabled;
    }

    /// 获取物理是否启用
    pub fn is_physics_enabled(&self) -> bool {
        self.physics_enabled && self.physics.is_some()
    }

    /// 获取物理系统是否已挂接
    pub fn has_physics(&self) -> bool {
        self.physics.is_some()
    }

    fn update_physics(&mut self, elapsed: f32) {
        if !self.physics_enabled {
            return;
        }
        let Some(physics) = self.physics.as_mut() else {
            return;
        };

        self.physics_overrides.clear();
        physics.update(elapsed, &self.node_manager, &mut self.physics_overrides);

        self.node_manager.apply_physics_overrides(&self.physics_overrides);
    }
}
