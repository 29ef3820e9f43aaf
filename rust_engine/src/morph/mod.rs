//! Morph 协作接口
//!
//! Morph 权重的计算在引擎外部完成，这里只规定结果怎样交给蒙皮。

use glam::Vec3;

use crate::skeleton::NodeManager;

/// Morph 变形器
pub trait MorphDeformer: Send {
    /// 写入顶点位置偏移
    ///
    /// `offsets` 与顶点数等长，每次 `update_animation` 前清零。蒙皮使用 原始位置 + 偏移。
    fn apply_vertex_offsets(&mut self, offsets: &mut [Vec3]);

    /// 骨骼 Morph：在 `end_animation` 中叠加到动作层写入的姿势上，每帧一次
    fn apply_node_offsets(&mut self, _nodes: &mut NodeManager) {}
}
