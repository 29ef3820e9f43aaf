//! IK 管理器

use std::collections::HashMap;

use super::{IkSolver, NodeManager};
use crate::{MmdError, Result};

/// IK 管理器，拥有全部求解器；骨骼只保存求解器索引
pub struct IkManager {
    solvers: Vec<IkSolver>,
    name_to_index: HashMap<String, usize>,
}

impl IkManager {
    pub fn new() -> Self {
        Self {
            solvers: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// 添加求解器，返回索引
    pub fn add_solver(&mut self, solver: IkSolver) -> usize {
        let index = self.solvers.len();
        self.name_to_index.entry(solver.name.clone()).or_insert(index);
        self.solvers.push(solver);
        index
    }

    /// 把求解器绑定到各自的 IK 骨骼上
    ///
    /// 要求 `nodes` 已经 build_hierarchy。效果器和链上骨骼必须在遍历序列中先于 IK 骨骼。
    pub fn bind(&self, nodes: &mut NodeManager) -> Result<()> {
        let node_count = nodes.node_count();
        for (index, solver) in self.solvers.iter().enumerate() {
            let check = |node: usize, role: &str| {
                if node >= node_count {
                    Err(MmdError::Ik(format!(
                        "solver '{}' references missing {} node {}",
                        solver.name, role, node
                    )))
                } else {
                    Ok(())
                }
            };
            check(solver.ik_node, "IK")?;
            check(solver.effector, "effector")?;
            for link in &solver.links {
                check(link.node, "link")?;
            }

            nodes.check_dependency(solver.effector, solver.ik_node, "IK effector")?;
            for link in &solver.links {
                nodes.check_dependency(link.node, solver.ik_node, "IK link")?;
            }

            let node = &mut nodes.nodes_mut()[solver.ik_node];
            if node.ik_solver.is_some() {
                return Err(MmdError::Ik(format!(
                    "node '{}' already has an IK solver",
                    node.name
                )));
            }
            node.ik_solver = Some(index);
        }
        Ok(())
    }

    pub fn solver_count(&self) -> usize {
        self.solvers.len()
    }

    pub fn solver(&self, index: usize) -> Option<&IkSolver> {
        self.solvers.get(index)
    }

    pub fn find_solver_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(solver) = self.solvers.get_mut(index) {
            solver.enabled = enabled;
        }
    }

    /// 按名称启用/禁用，返回是否找到
    pub fn set_enabled_by_name(&mut self, name: &str, enabled: bool) -> bool {
        match self.find_solver_by_name(name) {
            Some(index) => {
                self.set_enabled(index, enabled);
                true
            }
            None => false,
        }
    }

    pub fn set_all_enabled(&mut self, enabled: bool) {
        for solver in &mut self.solvers {
            solver.enabled = enabled;
        }
    }
}

impl Default for IkManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{IkLink, Node};

    fn chain(ik_depth: i32) -> NodeManager {
        let mut nodes = NodeManager::new();
        nodes.add_node(Node::new("leg"));
        let mut knee = Node::new("knee");
        knee.parent = Some(0);
        nodes.add_node(knee);
        let mut ik = Node::new("leg IK");
        ik.deform_depth = ik_depth;
        nodes.add_node(ik);
        nodes.build_hierarchy().unwrap();
        nodes
    }

    fn solver() -> IkSolver {
        let mut solver = IkSolver::new("leg IK", 2, 1);
        solver.links.push(IkLink { node: 0, limits: None });
        solver
    }

    #[test]
    fn test_bind_sets_node_reference() {
        let mut nodes = chain(0);
        let mut ik = IkManager::new();
        ik.add_solver(solver());
        ik.bind(&mut nodes).unwrap();
        assert_eq!(nodes.node(2).unwrap().ik_solver, Some(0));
        assert_eq!(ik.find_solver_by_name("leg IK"), Some(0));
    }

    #[test]
    fn test_bind_rejects_missing_link() {
        let mut nodes = chain(0);
        let mut ik = IkManager::new();
        let mut s = solver();
        s.links.push(IkLink { node: 9, limits: None });
        ik.add_solver(s);
        assert!(matches!(ik.bind(&mut nodes), Err(MmdError::Ik(_))));
    }

    #[test]
    fn test_bind_rejects_link_visited_after_ik_node() {
        let mut nodes = NodeManager::new();
        nodes.add_node(Node::new("leg IK"));
        nodes.add_node(Node::new("leg"));
        nodes.add_node(Node::new("knee"));
        nodes.build_hierarchy().unwrap();

        let mut ik = IkManager::new();
        let mut s = IkSolver::new("leg IK", 0, 2);
        s.links.push(IkLink { node: 1, limits: None });
        ik.add_solver(s);
        assert!(matches!(ik.bind(&mut nodes), Err(MmdError::DeformOrder(_))));
    }

    #[test]
    fn test_enable_by_name() {
        let mut ik = IkManager::new();
        ik.add_solver(solver());
        assert!(ik.set_enabled_by_name("leg IK", false));
        assert!(!ik.solver(0).unwrap().enabled);
        assert!(!ik.set_enabled_by_name("arm IK", false));
    }
}
