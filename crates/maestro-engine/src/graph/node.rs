use std::sync::Arc;

use crate::steps::Step;

/// A named step inside a DAG, with the sibling names it waits on.
#[derive(Clone)]
pub struct DagNode {
    /// Unique within its DAG.
    pub name: String,
    pub step: Arc<dyn Step>,
    /// Sibling node names, in declaration order, without duplicates.
    pub dependencies: Vec<String>,
}

impl DagNode {
    /// Create a node with no dependencies.
    pub fn new(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            step,
            dependencies: vec![],
        }
    }

    /// Declare the nodes this one waits on. Repeated names are ignored.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl std::fmt::Debug for DagNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagNode")
            .field("name", &self.name)
            .field("step", &self.step.name())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::NoOp;

    #[test]
    fn test_dependencies_deduplicated() {
        let node = DagNode::new("d", Arc::new(NoOp)).depends_on(["b", "c", "b"]);
        assert_eq!(node.dependencies, vec!["b", "c"]);
        assert!(!node.is_root());
        assert!(DagNode::new("a", Arc::new(NoOp)).is_root());
    }
}
