//! 模型装配
//!
//! 文件解析在引擎外部完成，解析结果以 [`ModelDesc`] 交给 [`load_model`]。
//! 所有结构性错误都在这里报告，加载成功后每帧更新不会再失败。

use glam::{Vec2, Vec3};

use crate::config::get_config;
use crate::skeleton::{AppendBinding, IkLink, IkManager, IkSolver, Node, NodeManager};
use crate::skinning::{SkinningContext, VertexBoneInfo};
use crate::{MmdError, Result};

use super::{IndexBuffer, MmdMaterial, MmdModel, SubMesh};

/// 骨骼描述
#[derive(Clone, Debug)]
pub struct NodeDesc {
    pub name: String,
    pub parent: Option<usize>,
    /// 模型空间中的初始位置
    pub position: Vec3,
    pub deform_depth: i32,
    pub deform_after_physics: bool,
    pub append: Option<AppendBinding>,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>, parent: Option<usize>, position: Vec3) -> Self {
        Self {
            name: name.into(),
            parent,
            position,
            deform_depth: 0,
            deform_after_physics: false,
            append: None,
        }
    }
}

/// IK 描述
#[derive(Clone, Debug)]
pub struct IkDesc {
    pub ik_node: usize,
    pub effector: usize,
    pub iterations: u32,
    pub limit_angle: f32,
    pub links: Vec<IkLink>,
}

/// 模型描述（解析器输出）
#[derive(Clone, Debug, Default)]
pub struct ModelDesc {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub bone_infos: Vec<VertexBoneInfo>,
    pub indices: Vec<u32>,
    pub materials: Vec<MmdMaterial>,
    pub submeshes: Vec<SubMesh>,
    pub nodes: Vec<NodeDesc>,
    pub iks: Vec<IkDesc>,
}

/// 校验模型描述并创建运行时模型
pub fn load_model(desc: ModelDesc) -> Result<MmdModel> {
    let config = get_config();
    let vertex_count = desc.positions.len();
    let node_count = desc.nodes.len();

    validate_vertices(&desc)?;
    validate_mesh(&desc)?;

    // 骨骼
    let mut node_manager = NodeManager::new();
    for node_desc in &desc.nodes {
        let mut node = Node::new(node_desc.name.clone());
        node.parent = node_desc.parent;
        node.initial_position = node_desc.position;
        node.deform_depth = node_desc.deform_depth;
        node.deform_after_physics = node_desc.deform_after_physics;
        node.append = node_desc.append;
        node_manager.add_node(node);
    }
    node_manager.build_hierarchy()?;

    // IK
    let mut ik_manager = IkManager::new();
    for ik in &desc.iks {
        let name = desc
            .nodes
            .get(ik.ik_node)
            .map(|n| n.name.clone())
            .ok_or_else(|| MmdError::Ik(format!("IK node {} does not exist", ik.ik_node)))?;

        let mut solver = IkSolver::new(name, ik.ik_node, ik.effector);
        solver.iterations = ik.iterations.min(config.max_ik_iterations);
        solver.limit_angle = ik.limit_angle;
        solver.links = ik.links.clone();
        solver.enabled = config.ik_enabled;
        ik_manager.add_solver(solver);
    }
    ik_manager.bind(&mut node_manager)?;

    let indices = IndexBuffer::from_u32(desc.indices, vertex_count);
    let mut model = MmdModel::from_parts(
        desc.name,
        desc.positions,
        desc.normals,
        desc.uvs,
        desc.bone_infos,
        indices,
        desc.materials,
        desc.submeshes,
        node_manager,
        ik_manager,
        SkinningContext::from_config(&config),
        config.ik_enabled,
    );

    // 加载后立即计算一次姿势和蒙皮，确保顶点位置正确
    model.initialize_animation();
    model.update(0.0);

    log::info!(
        "模型 '{}' 加载完成: {} 顶点, {} 索引 ({} 字节), {} 骨骼, {} IK, {} 材质",
        model.name(),
        vertex_count,
        model.index_count(),
        model.index_element_size(),
        node_count,
        model.ik_manager().solver_count(),
        model.material_count(),
    );

    Ok(model)
}

fn validate_vertices(desc: &ModelDesc) -> Result<()> {
    let vertex_count = desc.positions.len();
    let lengths = [
        ("normals", desc.normals.len()),
        ("uvs", desc.uvs.len()),
        ("bone infos", desc.bone_infos.len()),
    ];
    for (what, len) in lengths {
        if len != vertex_count {
            return Err(MmdError::VertexData(format!(
                "{} has {} entries, expected {}",
                what, len, vertex_count
            )));
        }
    }

    let node_count = desc.nodes.len();
    for (i, info) in desc.bone_infos.iter().enumerate() {
        if let Some(&bone) = info.bones().iter().find(|&&b| b as usize >= node_count) {
            return Err(MmdError::VertexData(format!(
                "vertex {} references missing node {}",
                i, bone
            )));
        }
    }
    Ok(())
}

fn validate_mesh(desc: &ModelDesc) -> Result<()> {
    let vertex_count = desc.positions.len();
    if let Some(&index) = desc.indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(MmdError::IndexData(format!(
            "index {} out of range ({} vertices)",
            index, vertex_count
        )));
    }

    for (i, submesh) in desc.submeshes.iter().enumerate() {
        if submesh.index_range().end > desc.indices.len() {
            return Err(MmdError::IndexData(format!(
                "submesh {} spans past the index buffer",
                i
            )));
        }
        if submesh.material >= desc.materials.len() {
            return Err(MmdError::Material(format!(
                "submesh {} references missing material {}",
                i, submesh.material
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> ModelDesc {
        ModelDesc {
            name: "triangle".into(),
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 3],
            uvs: vec![Vec2::ZERO; 3],
            bone_infos: vec![VertexBoneInfo::Weight1 { bone: 0 }; 3],
            indices: vec![0, 1, 2],
            materials: vec![MmdMaterial::new("body")],
            submeshes: vec![SubMesh::new(0, 3, 0)],
            nodes: vec![NodeDesc::new("root", None, Vec3::ZERO)],
            iks: Vec::new(),
        }
    }

    #[test]
    fn test_load_valid_model() {
        let model = load_model(triangle()).unwrap();
        assert_eq!(model.vertex_count(), 3);
        assert_eq!(model.submeshes()[0].index_range(), 0..3);
        assert_eq!(model.update_positions(), model.positions());
    }

    #[test]
    fn test_vertex_length_mismatch() {
        let mut desc = triangle();
        desc.normals.pop();
        assert!(matches!(load_model(desc), Err(MmdError::VertexData(_))));
    }

    #[test]
    fn test_missing_bone_in_vertex() {
        let mut desc = triangle();
        desc.bone_infos[1] = VertexBoneInfo::Weight2 { bones: [0, 3], weights: [0.5, 0.5] };
        assert!(matches!(load_model(desc), Err(MmdError::VertexData(_))));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut desc = triangle();
        desc.indices[2] = 7;
        assert!(matches!(load_model(desc), Err(MmdError::IndexData(_))));
    }

    #[test]
    fn test_submesh_errors() {
        let mut desc = triangle();
        desc.submeshes = vec![SubMesh::new(0, 6, 0)];
        assert!(matches!(load_model(desc), Err(MmdError::IndexData(_))));

        let mut desc = triangle();
        desc.submeshes = vec![SubMesh::new(0, 3, 2)];
        assert!(matches!(load_model(desc), Err(MmdError::Material(_))));
    }

    #[test]
    fn test_missing_parent_fails_load() {
        let mut desc = triangle();
        desc.nodes.push(NodeDesc::new("orphan", Some(9), Vec3::ZERO));
        assert!(matches!(load_model(desc), Err(MmdError::Hierarchy(_))));
    }

    #[test]
    fn test_missing_ik_node_fails_load() {
        let mut desc = triangle();
        desc.iks.push(IkDesc {
            ik_node: 4,
            effector: 0,
            iterations: 10,
            limit_angle: 1.0,
            links: Vec::new(),
        });
        assert!(matches!(load_model(desc), Err(MmdError::Ik(_))));
    }
}
