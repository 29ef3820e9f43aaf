//! IK 求解器（CCD）

use glam::{EulerRot, Quat, Vec3};

use super::NodeManager;

/// IK 链接信息
#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    pub node: usize,
    /// 欧拉角限制 (min, max)，弧度
    pub limits: Option<(Vec3, Vec3)>,
}

/// IK 求解器
///
/// 旋转链上各骨骼，使效果器尽量接近 IK 骨骼的位置。
#[derive(Clone, Debug)]
pub struct IkSolver {
    pub name: String,
    /// IK 骨骼（目标位置）
    pub ik_node: usize,
    /// 效果器骨骼
    pub effector: usize,
    pub links: Vec<IkLink>,
    pub iterations: u32,
    /// 单次迭代的最大旋转角度
    pub limit_angle: f32,
    pub enabled: bool,
}

impl IkSolver {
    pub fn new(name: impl Into<String>, ik_node: usize, effector: usize) -> Self {
        Self {
            name: name.into(),
            ik_node,
            effector,
            links: Vec::new(),
            iterations: 0,
            limit_angle: std::f32::consts::PI,
            enabled: true,
        }
    }

    /// 求解 IK
    ///
    /// 迭代直到效果器距离不再缩小或用完迭代次数，保留最好的一次结果。
    /// 不收敛不是错误。
    pub fn solve(&self, nodes: &mut NodeManager) {
        if !self.enabled {
            return;
        }

        // 初始化 IK 链
        for link in &self.links {
            let node = &mut nodes.nodes_mut()[link.node];
            node.ik_rotate = Quat::IDENTITY;
            node.enable_ik = true;
            node.update_local_transform();
            nodes.update_global_transform(link.node);
        }

        let target_pos = nodes.nodes()[self.ik_node].global_position();

        let mut max_dist = f32::MAX;
        let mut saved_ik_rotates = vec![Quat::IDENTITY; self.links.len()];

        for _ in 0..self.iterations {
            self.solve_core(nodes, target_pos);

            let effector_pos = nodes.nodes()[self.effector].global_position();
            let dist = (effector_pos - target_pos).length();

            if dist < max_dist {
                max_dist = dist;
                for (saved, link) in saved_ik_rotates.iter_mut().zip(&self.links) {
                    *saved = nodes.nodes()[link.node].ik_rotate;
                }
            } else {
                // 恢复最佳结果
                for (saved, link) in saved_ik_rotates.iter().zip(&self.links) {
                    let node = &mut nodes.nodes_mut()[link.node];
                    node.ik_rotate = *saved;
                    node.update_local_transform();
                    nodes.update_global_transform(link.node);
                }
                break;
            }
        }
    }

    fn solve_core(&self, nodes: &mut NodeManager, target_pos: Vec3) {
        for link in &self.links {
            if link.node == self.effector {
                continue;
            }

            let effector_pos = nodes.nodes()[self.effector].global_position();

            // 在链接骨骼的本地空间中计算
            let inv_chain = nodes.nodes()[link.node].global_transform.inverse();
            let chain_target_vec = inv_chain.transform_point3(target_pos).normalize_or_zero();
            let chain_effector_vec = inv_chain.transform_point3(effector_pos).normalize_or_zero();

            if chain_target_vec.length_squared() < 1e-6 || chain_effector_vec.length_squared() < 1e-6 {
                continue;
            }

            let dot = chain_effector_vec.dot(chain_target_vec).clamp(-1.0, 1.0);
            let angle = dot.acos();
            if angle < 1e-3_f32.to_radians() {
                continue;
            }
            let angle = angle.min(self.limit_angle);

            let axis = chain_effector_vec.cross(chain_target_vec).normalize_or_zero();
            if axis.length_squared() < 1e-6 {
                continue;
            }

            let rot = Quat::from_axis_angle(axis, angle);

            let node = &mut nodes.nodes_mut()[link.node];
            // chainRot = ik_rotate * animation_rotate * rot
            let chain_rot = node.ik_rotate * node.animation_rotate * rot;
            let chain_rot = match link.limits {
                Some((min, max)) => clamp_euler(chain_rot, min, max),
                None => chain_rot,
            };

            node.ik_rotate = chain_rot * node.animation_rotate.inverse();
            node.update_local_transform();
            nodes.update_global_transform(link.node);
        }
    }
}

/// 按 XYZ 欧拉角限制旋转
fn clamp_euler(rotation: Quat, min: Vec3, max: Vec3) -> Quat {
    let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
    Quat::from_euler(
        EulerRot::XYZ,
        x.clamp(min.x, max.x),
        y.clamp(min.y, max.y),
        z.clamp(min.z, max.z),
    )
}
