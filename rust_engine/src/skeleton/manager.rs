//! 骨骼管理器

use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;

use super::{IkManager, Node, NodePose};
use crate::physics::PhysicsOverride;
use crate::{MmdError, Result};

/// 骨骼管理器
///
/// 拥有全部骨骼，维护父子关系和按变形层级排序的遍历序列。
pub struct NodeManager {
    nodes: Vec<Node>,
    name_to_index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    sorted_indices: Vec<usize>,
    /// 骨骼在 sorted_indices 中的位置
    sorted_position: Vec<usize>,
    skinning_matrices: Vec<Mat4>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            name_to_index: HashMap::new(),
            children: Vec::new(),
            sorted_indices: Vec::new(),
            sorted_position: Vec::new(),
            skinning_matrices: Vec::new(),
        }
    }

    /// 添加骨骼，返回索引
    pub fn add_node(&mut self, node: Node) -> usize {
        let index = self.nodes.len();
        // 重名时保留第一个
        self.name_to_index.entry(node.name.clone()).or_insert(index);
        self.nodes.push(node);
        index
    }

    /// 构建骨骼层级并计算逆绑定矩阵
    ///
    /// 校验父子关系和附加变换引用，按变形层级稳定排序。
    /// 必须在添加完所有骨骼后、第一次更新前调用一次。
    pub fn build_hierarchy(&mut self) -> Result<()> {
        let node_count = self.nodes.len();

        self.validate_parents()?;
        self.validate_append()?;

        self.children = vec![Vec::new(); node_count];
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                self.children[parent].push(i);
            }
        }

        // 按变形层级排序（sort_by 是稳定排序，同层级保持索引顺序）
        self.sorted_indices = (0..node_count).collect();
        let nodes = &self.nodes;
        self.sorted_indices
            .sort_by(|&a, &b| nodes[a].deform_depth.cmp(&nodes[b].deform_depth));
        self.sorted_position = vec![0; node_count];
        for (position, &index) in self.sorted_indices.iter().enumerate() {
            self.sorted_position[index] = position;
        }

        for i in 0..node_count {
            if let Some(source) = self.nodes[i].append.map(|a| a.source) {
                self.check_dependency(source, i, "append")?;
            }
        }

        for i in 0..node_count {
            let pos = self.nodes[i].initial_position;

            // 相对于父骨骼的偏移（用于本地变换）
            let offset = match self.nodes[i].parent {
                Some(parent) => pos - self.nodes[parent].initial_position,
                None => pos,
            };
            self.nodes[i].bone_offset = offset;

            // 初始全局变换直接从模型空间位置创建，逆绑定矩阵取其逆
            let init_global = Mat4::from_translation(pos);
            self.nodes[i].global_transform = init_global;
            self.nodes[i].inverse_bind_matrix = init_global.inverse();
            self.nodes[i].local_transform = Mat4::from_translation(offset);
        }

        // 初始状态下：skinning_matrix = global * inverse_bind = I
        self.skinning_matrices = vec![Mat4::IDENTITY; node_count];
        self.update_skinning_matrices();

        Ok(())
    }

    fn validate_parents(&self) -> Result<()> {
        let node_count = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match node.parent {
                Some(parent) if parent >= node_count => {
                    return Err(MmdError::Hierarchy(format!(
                        "node '{}' references missing parent {}",
                        node.name, parent
                    )));
                }
                Some(parent) if parent == i => {
                    return Err(MmdError::Hierarchy(format!(
                        "node '{}' is its own parent",
                        node.name
                    )));
                }
                Some(parent) if self.nodes[parent].deform_after_physics && !node.deform_after_physics => {
                    return Err(MmdError::DeformOrder(format!(
                        "'{}' deforms before physics but its parent '{}' deforms after physics",
                        node.name, self.nodes[parent].name
                    )));
                }
                _ => {}
            }
        }

        // 沿父链上溯，步数超过骨骼数说明存在环
        for (i, node) in self.nodes.iter().enumerate() {
            let mut current = node.parent;
            let mut steps = 0;
            while let Some(p) = current {
                steps += 1;
                if steps > node_count {
                    return Err(MmdError::Hierarchy(format!(
                        "parent cycle through node '{}' ({})",
                        node.name, i
                    )));
                }
                current = self.nodes[p].parent;
            }
        }
        Ok(())
    }

    fn validate_append(&self) -> Result<()> {
        let node_count = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            let Some(append) = node.append else {
                continue;
            };
            if append.source >= node_count {
                return Err(MmdError::Hierarchy(format!(
                    "node '{}' appends from missing node {}",
                    node.name, append.source
                )));
            }
            if append.source == i {
                return Err(MmdError::AppendCycle(node.name.clone()));
            }
        }

        for node in &self.nodes {
            let mut current = node.append.map(|a| a.source);
            let mut steps = 0;
            while let Some(source) = current {
                steps += 1;
                if steps > node_count {
                    return Err(MmdError::AppendCycle(node.name.clone()));
                }
                current = self.nodes[source].append.map(|a| a.source);
            }
        }
        Ok(())
    }

    /// 校验依赖边 dependent → source：source 必须在遍历序列中先于 dependent，
    /// 物理前变形的骨骼不能依赖物理后变形的骨骼
    pub(crate) fn check_dependency(&self, source: usize, dependent: usize, kind: &str) -> Result<()> {
        let src = &self.nodes[source];
        let dst = &self.nodes[dependent];
        if self.sorted_position[source] >= self.sorted_position[dependent] {
            return Err(MmdError::DeformOrder(format!(
                "{} source '{}' (depth {}) is not visited before '{}' (depth {})",
                kind, src.name, src.deform_depth, dst.name, dst.deform_depth
            )));
        }
        if src.deform_after_physics && !dst.deform_after_physics {
            return Err(MmdError::DeformOrder(format!(
                "'{}' deforms before physics but its {} source '{}' deforms after physics",
                dst.name, kind, src.name
            )));
        }
        Ok(())
    }

    /// 通过名称查找骨骼
    pub fn find_node_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// 获取骨骼数量
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 获取骨骼
    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// 按变形层级排序后的遍历序列
    pub fn sorted_indices(&self) -> &[usize] {
        &self.sorted_indices
    }

    /// 直接子骨骼
    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 开始更新：每个骨骼清除上一帧状态
    pub fn begin_update(&mut self) {
        for node in &mut self.nodes {
            node.begin_update();
        }
    }

    /// 设置骨骼动画姿势
    pub fn set_node_pose(&mut self, index: usize, pose: NodePose) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.set_pose(pose);
        }
    }

    /// 设置骨骼动画平移
    pub fn set_node_translation(&mut self, index: usize, translation: Vec3) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.animation_translate = translation;
        }
    }

    /// 设置骨骼动画旋转
    pub fn set_node_rotation(&mut self, index: usize, rotation: Quat) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.animation_rotate = rotation;
        }
    }

    /// 更新骨骼变换（物理前 / 物理后各调用一次）
    ///
    /// 1. 更新本地变换
    /// 2. 从根骨骼递归更新全局变换
    /// 3. 按顺序处理附加变换和 IK
    /// 4. 再次从根骨骼更新全局变换
    pub fn update_transforms(&mut self, ik: &IkManager, after_physics: bool) {
        for k in 0..self.sorted_indices.len() {
            let idx = self.sorted_indices[k];
            if self.nodes[idx].deform_after_physics != after_physics {
                continue;
            }
            self.nodes[idx].update_local_transform();
        }

        self.update_roots(after_physics);

        for k in 0..self.sorted_indices.len() {
            let idx = self.sorted_indices[k];
            if self.nodes[idx].deform_after_physics != after_physics {
                continue;
            }

            if self.nodes[idx].has_append() {
                self.update_append_transform(idx);
                self.update_global_transform(idx);
            }

            if let Some(solver) = self.nodes[idx].ik_solver.and_then(|s| ik.solver(s)) {
                solver.solve(self);
                self.update_global_transform(idx);
            }
        }

        self.update_roots(after_physics);
    }

    /// 从本阶段的根开始递归更新：没有父骨骼，或父骨骼属于另一个阶段
    fn update_roots(&mut self, after_physics: bool) {
        for k in 0..self.sorted_indices.len() {
            let idx = self.sorted_indices[k];
            let node = &self.nodes[idx];
            if node.deform_after_physics != after_physics {
                continue;
            }
            let is_phase_root = match node.parent {
                Some(parent) => self.nodes[parent].deform_after_physics != after_physics,
                None => true,
            };
            if is_phase_root {
                self.update_global_transform(idx);
            }
        }
    }

    /// 递归更新骨骼及其子树的全局变换
    pub fn update_global_transform(&mut self, index: usize) {
        let global = match self.nodes[index].parent {
            Some(parent) => self.nodes[parent].global_transform * self.nodes[index].local_transform,
            None => self.nodes[index].local_transform,
        };
        self.nodes[index].global_transform = global;

        for k in 0..self.children[index].len() {
            let child = self.children[index][k];
            self.update_global_transform(child);
        }
    }

    /// 采样附加源的当前帧变换，写入附加缓存并重算本地变换
    ///
    /// `local` 模式读取源骨骼的动画姿势；否则源骨骼本身有附加源时读取其附加缓存。
    /// 源骨骼启用了 IK 时叠加其 IK 旋转。
    pub fn update_append_transform(&mut self, index: usize) {
        let Some(append) = self.nodes[index].append else {
            return;
        };
        let source = &self.nodes[append.source];

        if append.rotate {
            let sampled = if append.local || source.append.is_none() {
                source.animation_rotate
            } else {
                source.append_rotate
            };
            let sampled = if source.enable_ik {
                source.ik_rotate * sampled
            } else {
                sampled
            };
            self.nodes[index].append_rotate = Quat::IDENTITY.slerp(sampled, append.weight);
        }

        if append.translate {
            let source = &self.nodes[append.source];
            let sampled = if append.local || source.append.is_none() {
                source.animation_translate
            } else {
                source.append_translate
            };
            self.nodes[index].append_translate = sampled * append.weight;
        }

        self.nodes[index].update_local_transform();
    }

    /// 获取全局变换
    pub fn global_transform(&self, index: usize) -> Mat4 {
        self.nodes
            .get(index)
            .map(|n| n.global_transform)
            .unwrap_or(Mat4::IDENTITY)
    }

    /// 设置全局变换（用于物理系统）
    ///
    /// 由父骨骼的全局变换反推本地变换，然后更新子骨骼。动画姿势不受影响。
    pub fn set_global_transform(&mut self, index: usize, transform: Mat4) {
        if index >= self.nodes.len() {
            return;
        }

        self.nodes[index].global_transform = transform;
        self.nodes[index].local_transform = match self.nodes[index].parent {
            Some(parent) => self.nodes[parent].global_transform.inverse() * transform,
            None => transform,
        };

        for k in 0..self.children[index].len() {
            let child = self.children[index][k];
            self.update_global_transform(child);
        }
    }

    /// 批量写入物理结果
    ///
    /// 先写入所有被接管骨骼的全局变换，再沿层级自上而下：
    /// 被接管的骨骼由父骨骼的最终全局变换反推本地变换，其余骨骼按本地变换重算全局变换。
    /// 写入顺序不影响结果。
    pub fn apply_physics_overrides(&mut self, overrides: &[PhysicsOverride]) {
        if overrides.is_empty() {
            return;
        }

        let mut overridden = vec![false; self.nodes.len()];
        for o in overrides {
            match self.nodes.get_mut(o.node) {
                Some(node) => {
                    node.global_transform = o.transform;
                    overridden[o.node] = true;
                }
                None => log::warn!("物理结果引用了不存在的骨骼 {}", o.node),
            }
        }

        for index in 0..self.nodes.len() {
            if self.nodes[index].parent.is_none() {
                self.refresh_overridden_subtree(index, &overridden);
            }
        }
    }

    fn refresh_overridden_subtree(&mut self, index: usize, overridden: &[bool]) {
        let parent_global = self.nodes[index].parent.map(|p| self.nodes[p].global_transform);
        let node = &mut self.nodes[index];
        if overridden[index] {
            node.local_transform = match parent_global {
                Some(parent_global) => parent_global.inverse() * node.global_transform,
                None => node.global_transform,
            };
        } else {
            node.global_transform = match parent_global {
                Some(parent_global) => parent_global * node.local_transform,
                None => node.local_transform,
            };
        }

        for k in 0..self.children[index].len() {
            let child = self.children[index][k];
            self.refresh_overridden_subtree(child, overridden);
        }
    }

    /// 根据当前全局变换刷新蒙皮矩阵
    pub fn update_skinning_matrices(&mut self) {
        for (matrix, node) in self.skinning_matrices.iter_mut().zip(&self.nodes) {
            *matrix = node.skinning_matrix();
        }
    }

    /// 获取蒙皮矩阵数组
    pub fn skinning_matrices(&self) -> &[Mat4] {
        &self.skinning_matrices
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::AppendBinding;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    fn node(name: &str, parent: Option<usize>, depth: i32, position: Vec3) -> Node {
        let mut node = Node::new(name);
        node.parent = parent;
        node.deform_depth = depth;
        node.initial_position = position;
        node
    }

    fn append(source: usize, rotate: bool, translate: bool, local: bool, weight: f32) -> Option<AppendBinding> {
        Some(AppendBinding { source, rotate, translate, local, weight })
    }

    fn run_frame(manager: &mut NodeManager) {
        let ik = IkManager::new();
        manager.update_transforms(&ik, false);
        manager.update_transforms(&ik, true);
        manager.update_skinning_matrices();
    }

    #[test]
    fn test_build_hierarchy_offsets_and_bind() {
        let mut manager = NodeManager::new();
        manager.add_node(node("root", None, 0, Vec3::new(0.0, 1.0, 0.0)));
        manager.add_node(node("child", Some(0), 0, Vec3::new(0.0, 3.0, 0.0)));
        manager.build_hierarchy().unwrap();

        let child = manager.node(1).unwrap();
        assert!(approx(child.bone_offset, Vec3::new(0.0, 2.0, 0.0)));
        assert_eq!(manager.children(0), &[1]);
        for m in manager.skinning_matrices() {
            assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-6));
        }
    }

    #[test]
    fn test_sort_is_stable_by_depth() {
        let mut manager = NodeManager::new();
        manager.add_node(node("a", None, 2, Vec3::ZERO));
        manager.add_node(node("b", None, 0, Vec3::ZERO));
        manager.add_node(node("c", None, 1, Vec3::ZERO));
        manager.add_node(node("d", None, 0, Vec3::ZERO));
        manager.build_hierarchy().unwrap();
        assert_eq!(manager.sorted_indices(), &[1, 3, 2, 0]);
    }

    #[test]
    fn test_world_is_parent_times_local() {
        let mut manager = NodeManager::new();
        manager.add_node(node("root", None, 0, Vec3::ZERO));
        manager.add_node(node("child", Some(0), 0, Vec3::new(0.0, 2.0, 0.0)));
        manager.add_node(node("grandchild", Some(1), 0, Vec3::new(0.0, 4.0, 0.0)));
        manager.build_hierarchy().unwrap();

        manager.begin_update();
        manager.set_node_pose(0, NodePose::new(Vec3::new(1.0, 0.0, 0.0), Quat::from_rotation_z(0.4)));
        manager.set_node_rotation(1, Quat::from_rotation_x(-0.7));
        run_frame(&mut manager);

        for i in 0..manager.node_count() {
            let n = manager.node(i).unwrap();
            let parent_global = n.parent.map_or(Mat4::IDENTITY, |p| manager.global_transform(p));
            let raw_local = Mat4::from_rotation_translation(
                n.animation_rotate,
                n.bone_offset + n.animation_translate,
            );
            assert_eq!(n.global_transform, parent_global * raw_local);
        }
    }

    #[test]
    fn test_append_translate_half_weight() {
        let mut manager = NodeManager::new();
        manager.add_node(node("root", None, 0, Vec3::ZERO));
        let mut child = node("child", Some(0), 1, Vec3::ZERO);
        child.append = append(0, false, true, false, 0.5);
        manager.add_node(child);
        manager.build_hierarchy().unwrap();

        manager.begin_update();
        manager.set_node_translation(0, Vec3::new(2.0, 0.0, 0.0));
        run_frame(&mut manager);

        let child = manager.node(1).unwrap();
        assert!(approx(child.append_translate, Vec3::new(1.0, 0.0, 0.0)));
        // 父骨骼平移 (2,0,0) + 自身附加 (1,0,0)
        assert!(approx(child.global_position(), Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn test_append_rotate_slerp() {
        let mut manager = NodeManager::new();
        manager.add_node(node("source", None, 0, Vec3::ZERO));
        let mut target = node("target", None, 0, Vec3::ZERO);
        target.append = append(0, true, false, false, 0.5);
        manager.add_node(target);
        manager.build_hierarchy().unwrap();

        manager.begin_update();
        manager.set_node_rotation(0, Quat::from_rotation_y(1.0));
        run_frame(&mut manager);

        let target = manager.node(1).unwrap();
        assert!(target.append_rotate.abs_diff_eq(Quat::from_rotation_y(0.5), 1e-5));
    }

    #[test]
    fn test_append_local_ignores_source_chain() {
        // a ← b ← c(local) / d(非 local)
        let mut manager = NodeManager::new();
        manager.add_node(node("a", None, 0, Vec3::ZERO));
        let mut b = node("b", None, 0, Vec3::ZERO);
        b.append = append(0, false, true, false, 1.0);
        manager.add_node(b);
        let mut c = node("c", None, 0, Vec3::ZERO);
        c.append = append(1, false, true, true, 1.0);
        manager.add_node(c);
        let mut d = node("d", None, 0, Vec3::ZERO);
        d.append = append(1, false, true, false, 1.0);
        manager.add_node(d);
        manager.build_hierarchy().unwrap();

        manager.begin_update();
        manager.set_node_translation(0, Vec3::new(4.0, 0.0, 0.0));
        manager.set_node_translation(1, Vec3::new(0.0, 1.0, 0.0));
        run_frame(&mut manager);

        // local 模式：只取 b 的动画平移
        assert!(approx(manager.node(2).unwrap().append_translate, Vec3::new(0.0, 1.0, 0.0)));
        // 非 local：b 自身有附加源，取 b 的附加缓存
        assert!(approx(manager.node(3).unwrap().append_translate, Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut manager = NodeManager::new();
        manager.add_node(node("a", Some(5), 0, Vec3::ZERO));
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::Hierarchy(_))));
    }

    #[test]
    fn test_parent_cycle_rejected() {
        let mut manager = NodeManager::new();
        manager.add_node(node("a", Some(1), 0, Vec3::ZERO));
        manager.add_node(node("b", Some(0), 0, Vec3::ZERO));
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::Hierarchy(_))));
    }

    #[test]
    fn test_append_cycle_rejected() {
        let mut manager = NodeManager::new();
        let mut a = node("a", None, 0, Vec3::ZERO);
        a.append = append(1, true, false, false, 1.0);
        let mut b = node("b", None, 0, Vec3::ZERO);
        b.append = append(0, true, false, false, 1.0);
        manager.add_node(a);
        manager.add_node(b);
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::AppendCycle(_))));
    }

    #[test]
    fn test_append_from_deeper_node_rejected() {
        let mut manager = NodeManager::new();
        let mut a = node("a", None, 0, Vec3::ZERO);
        a.append = append(1, false, true, false, 1.0);
        manager.add_node(a);
        manager.add_node(node("b", None, 1, Vec3::ZERO));
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::DeformOrder(_))));
    }

    #[test]
    fn test_append_from_after_physics_node_rejected() {
        let mut manager = NodeManager::new();
        let mut source = node("source", None, 0, Vec3::ZERO);
        source.deform_after_physics = true;
        manager.add_node(source);
        let mut a = node("a", None, 1, Vec3::ZERO);
        a.append = append(0, true, false, false, 1.0);
        manager.add_node(a);
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::DeformOrder(_))));
    }

    #[test]
    fn test_before_physics_child_of_after_physics_parent_rejected() {
        let mut manager = NodeManager::new();
        let mut parent = node("parent", None, 0, Vec3::ZERO);
        parent.deform_after_physics = true;
        manager.add_node(parent);
        manager.add_node(node("child", Some(0), 0, Vec3::new(0.0, 1.0, 0.0)));
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::DeformOrder(_))));
    }

    #[test]
    fn test_physics_overrides_independent_of_order() {
        // head → hair1 → hair2 → ribbon，ribbon 不受物理接管
        let mut manager = NodeManager::new();
        manager.add_node(node("head", None, 0, Vec3::new(0.0, 2.0, 0.0)));
        manager.add_node(node("hair1", Some(0), 0, Vec3::new(0.0, 1.5, 0.0)));
        manager.add_node(node("hair2", Some(1), 0, Vec3::new(0.0, 1.0, 0.0)));
        manager.add_node(node("ribbon", Some(2), 0, Vec3::new(0.0, 0.5, 0.0)));
        manager.build_hierarchy().unwrap();
        manager.begin_update();
        run_frame(&mut manager);

        let hair1 = Mat4::from_translation(Vec3::new(3.0, 1.0, 0.0));
        let hair2 = Mat4::from_translation(Vec3::new(9.0, 9.0, 9.0));
        manager.apply_physics_overrides(&[
            PhysicsOverride { node: 2, transform: hair2 },
            PhysicsOverride { node: 1, transform: hair1 },
        ]);

        assert_eq!(manager.global_transform(1), hair1);
        assert_eq!(manager.global_transform(2), hair2);
        assert!(approx(manager.node(2).unwrap().local_transform.w_axis.truncate(), Vec3::new(6.0, 8.0, 9.0)));
        assert!(approx(manager.node(3).unwrap().global_position(), Vec3::new(9.0, 8.5, 9.0)));
        assert!(approx(manager.node(0).unwrap().global_position(), Vec3::new(0.0, 2.0, 0.0)));
    }

    #[test]
    fn test_set_global_transform_updates_children() {
        let mut manager = NodeManager::new();
        manager.add_node(node("root", None, 0, Vec3::ZERO));
        manager.add_node(node("child", Some(0), 0, Vec3::new(0.0, 1.0, 0.0)));
        manager.build_hierarchy().unwrap();
        manager.begin_update();
        run_frame(&mut manager);

        manager.set_global_transform(0, Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert!(approx(manager.node(1).unwrap().global_position(), Vec3::new(5.0, 1.0, 0.0)));
        // 动画姿势保持不变
        assert_eq!(manager.node(0).unwrap().pose(), NodePose::default());
    }
}
