//! 顶点蒙皮计算

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use super::{SkinningInput, SkinningOutput, VertexBoneInfo};
use crate::config::EngineConfig;

/// 蒙皮上下文
#[derive(Clone, Debug)]
pub struct SkinningContext {
    /// 顶点数达到该值时并行计算
    pub parallel_threshold: usize,
    pub normalize_normals: bool,
}

impl Default for SkinningContext {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SkinningContext {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            parallel_threshold: config.parallel_skinning_threshold,
            normalize_normals: config.normalize_normals,
        }
    }
}

/// 计算蒙皮，结果写入 `output`
///
/// 每个顶点只依赖自身的权重和当前蒙皮矩阵，顶点之间互不影响，
/// 所以并行与串行的结果逐位一致。
pub fn compute_skinning(ctx: &SkinningContext, input: &SkinningInput, output: SkinningOutput) {
    let matrices = input.bone_matrices;
    let morph = input.morph_offsets;
    let normalize = ctx.normalize_normals;

    let skin = |i: usize, pos_out: &mut Vec3, norm_out: &mut Vec3| {
        let base = match morph.get(i) {
            Some(offset) => input.positions[i] + *offset,
            None => input.positions[i],
        };
        let (pos, norm) = skin_vertex(base, input.normals[i], &input.bone_infos[i], matrices, normalize);
        *pos_out = pos;
        *norm_out = norm;
    };

    if input.positions.len() >= ctx.parallel_threshold {
        output
            .positions
            .par_iter_mut()
            .zip(output.normals.par_iter_mut())
            .enumerate()
            .for_each(|(i, (pos_out, norm_out))| skin(i, pos_out, norm_out));
    } else {
        output
            .positions
            .iter_mut()
            .zip(output.normals.iter_mut())
            .enumerate()
            .for_each(|(i, (pos_out, norm_out))| skin(i, pos_out, norm_out));
    }
}

/// 计算单个顶点的蒙皮
///
/// 先按权重混合蒙皮矩阵，再作用于位置；法线只使用矩阵的 3x3 部分。
pub fn skin_vertex(
    position: Vec3,
    normal: Vec3,
    info: &VertexBoneInfo,
    matrices: &[Mat4],
    normalize: bool,
) -> (Vec3, Vec3) {
    let m = blend_matrix(info, matrices);
    let pos = m.transform_point3(position);
    let norm = m.transform_vector3(normal);
    let norm = if normalize { norm.normalize_or_zero() } else { norm };
    (pos, norm)
}

fn blend_matrix(info: &VertexBoneInfo, matrices: &[Mat4]) -> Mat4 {
    match info {
        VertexBoneInfo::Weight1 { bone } => get_matrix(matrices, *bone),
        VertexBoneInfo::Weight2 { bones, weights } => {
            get_matrix(matrices, bones[0]) * weights[0] + get_matrix(matrices, bones[1]) * weights[1]
        }
        VertexBoneInfo::Weight4 { bones, weights } => {
            let mut m = get_matrix(matrices, bones[0]) * weights[0];
            for (&bone, &weight) in bones.iter().zip(weights).skip(1) {
                m += get_matrix(matrices, bone) * weight;
            }
            m
        }
    }
}

// 骨骼索引在加载时已校验
fn get_matrix(matrices: &[Mat4], index: u32) -> Mat4 {
    matrices.get(index as usize).copied().unwrap_or(Mat4::IDENTITY)
}
