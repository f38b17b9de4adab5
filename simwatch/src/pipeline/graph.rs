use std::collections::BTreeMap;

/// What the pipeline needs to know about an editor node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// Declared node type, e.g. `PSF`.
    pub node_type: String,
    /// Display name given in the editor.
    pub name: String,
}

/// Read-only view of the computation graph.
pub trait GraphView {
    fn node(&self, node_id: &str) -> Option<NodeInfo>;

    /// All nodes, in a stable order.
    fn nodes(&self) -> Vec<(String, NodeInfo)>;
}

/// Plain node table, for hosts that keep no richer graph model.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<String, NodeInfo>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn insert(&mut self, node_id: &str, node_type: &str, name: &str) {
        self.nodes.insert(
            node_id.to_string(),
            NodeInfo {
                node_type: node_type.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn remove(&mut self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl GraphView for Graph {
    fn node(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.get(node_id).cloned()
    }

    fn nodes(&self) -> Vec<(String, NodeInfo)> {
        self.nodes
            .iter()
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect()
    }
}
