//! 顶点蒙皮计算

mod skinning;

pub use skinning::{compute_skinning, skin_vertex, SkinningContext};

use glam::{Mat4, Vec3};

/// 蒙皮类型（参与混合的骨骼数）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkinningType {
    Weight1,
    Weight2,
    Weight4,
}

/// 顶点骨骼权重
///
/// 权重之和应为 1，这里不做归一化。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VertexBoneInfo {
    Weight1 { bone: u32 },
    Weight2 { bones: [u32; 2], weights: [f32; 2] },
    Weight4 { bones: [u32; 4], weights: [f32; 4] },
}

impl VertexBoneInfo {
    pub fn skinning_type(&self) -> SkinningType {
        match self {
            VertexBoneInfo::Weight1 { .. } => SkinningType::Weight1,
            VertexBoneInfo::Weight2 { .. } => SkinningType::Weight2,
            VertexBoneInfo::Weight4 { .. } => SkinningType::Weight4,
        }
    }

    /// 参与混合的骨骼索引
    pub fn bones(&self) -> &[u32] {
        match self {
            VertexBoneInfo::Weight1 { bone } => std::slice::from_ref(bone),
            VertexBoneInfo::Weight2 { bones, .. } => &bones[..],
            VertexBoneInfo::Weight4 { bones, .. } => &bones[..],
        }
    }
}

impl Default for VertexBoneInfo {
    fn default() -> Self {
        VertexBoneInfo::Weight1 { bone: 0 }
    }
}

/// 蒙皮输入数据
pub struct SkinningInput<'a> {
    /// 原始顶点位置
    pub positions: &'a [Vec3],
    /// 原始顶点法线
    pub normals: &'a [Vec3],
    /// Morph 位置偏移，与 positions 等长；为空表示没有偏移
    pub morph_offsets: &'a [Vec3],
    /// 顶点权重
    pub bone_infos: &'a [VertexBoneInfo],
    /// 骨骼蒙皮矩阵（已乘以逆绑定矩阵）
    pub bone_matrices: &'a [Mat4],
}

/// 蒙皮输出数据，每帧整体覆盖
pub struct SkinningOutput<'a> {
    /// 变换后的顶点位置
    pub positions: &'a mut [Vec3],
    /// 变换后的顶点法线
    pub normals: &'a mut [Vec3],
}
