//! MMD 骨骼变换与蒙皮引擎
//!
//! 每帧按变形层级顺序计算骨骼的全局变换（包含父子合成、附加变换和 IK 修正），
//! 然后进行线性混合蒙皮，得到渲染用的顶点位置和法线。
//!
//! - 骨骼层级、附加变换、IK 求解
//! - 顶点蒙皮计算（rayon 并行）
//! - 物理 / Morph / 动作层 的外部协作接口

pub mod animation;
pub mod config;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;
pub mod skinning;

pub use animation::{MotionSource, PoseSnapshot};
pub use config::{get_config, reset_config, set_config, EngineConfig};
pub use model::{load_model, IkDesc, IndexBuffer, MmdModel, ModelDesc, NodeDesc};
pub use morph::MorphDeformer;
pub use physics::{PhysicsDriver, PhysicsOverride};
pub use skeleton::{AppendBinding, IkManager, IkSolver, Node, NodeManager, NodePose};
pub use skinning::{SkinningType, VertexBoneInfo};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MmdError {
    #[error("vertex data error: {0}")]
    VertexData(String),

    #[error("index buffer error: {0}")]
    IndexData(String),

    #[error("material error: {0}")]
    Material(String),

    #[error("node hierarchy error: {0}")]
    Hierarchy(String),

    #[error("append cycle detected at node {0}")]
    AppendCycle(String),

    #[error("IK error: {0}")]
    Ik(String),

    #[error("deform order violation: {0}")]
    DeformOrder(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
