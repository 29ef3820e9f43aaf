//! 物理协作接口
//!
//! 刚体模拟在引擎外部实现。每次 `update_animation` 在物理前的骨骼更新之后调用一次
//! [`PhysicsDriver::update`]，返回的全局变换会覆盖对应骨骼，然后再进行物理后的骨骼更新。

use glam::Mat4;

use crate::skeleton::NodeManager;

/// 由物理接管的骨骼全局变换
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsOverride {
    pub node: usize,
    pub transform: Mat4,
}

/// 物理模拟器
pub trait PhysicsDriver: Send {
    /// 把刚体重置到当前骨骼姿势
    fn reset(&mut self, nodes: &NodeManager);

    /// 同步运动学刚体、推进 `elapsed` 秒，把动态刚体对应骨骼的全局变换写入 `overrides`
    ///
    /// `overrides` 调用前已清空。所有覆盖一起应用，与写入顺序无关。
    fn update(&mut self, elapsed: f32, nodes: &NodeManager, overrides: &mut Vec<PhysicsOverride>);
}
