//! 动作层协作接口
//!
//! 关键帧插值在引擎外部完成，动作层在 `begin_animation` / `end_animation` 之间写入骨骼姿势。

use std::collections::HashMap;

use crate::skeleton::{NodeManager, NodePose};

/// 动作数据源
pub trait MotionSource {
    /// 把 `frame` 处的姿势写入骨骼
    fn evaluate(&self, frame: f32, nodes: &mut NodeManager);
}

/// 静态姿势（按骨骼名称）
///
/// 与帧号无关，常用于姿势文件或测试。模型里找不到的骨骼名会被忽略。
#[derive(Clone, Debug, Default)]
pub struct PoseSnapshot {
    poses: HashMap<String, NodePose>,
}

impl PoseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, pose: NodePose) {
        self.poses.insert(name.into(), pose);
    }

    pub fn get(&self, name: &str) -> Option<&NodePose> {
        self.poses.get(name)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

impl MotionSource for PoseSnapshot {
    fn evaluate(&self, _frame: f32, nodes: &mut NodeManager) {
        for (name, pose) in &self.poses {
            match nodes.find_node_by_name(name) {
                Some(index) => nodes.set_node_pose(index, *pose),
                None => log::debug!("姿势中的骨骼 '{}' 不存在，跳过", name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Node;
    use glam::{Quat, Vec3};

    #[test]
    fn test_snapshot_sets_named_nodes() {
        let mut nodes = NodeManager::new();
        nodes.add_node(Node::new("頭"));
        nodes.build_hierarchy().unwrap();

        let mut snapshot = PoseSnapshot::new();
        let pose = NodePose::new(Vec3::new(0.0, 1.0, 0.0), Quat::from_rotation_y(0.2));
        snapshot.set("頭", pose);
        snapshot.set("存在しない", NodePose::default());
        snapshot.evaluate(0.0, &mut nodes);

        assert_eq!(nodes.node(0).unwrap().pose(), pose);
        assert_eq!(snapshot.len(), 2);
    }
}
