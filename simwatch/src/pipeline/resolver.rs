//! Output name resolution
//!
//! Maps an editor node id and output port to the server's canonical
//! `<server_node>.<port>` name. Resolution is total: when nothing better is
//! known a name is guessed from the node type, or made up from the node id.

use super::graph::GraphView;
use crate::wire::NodeListing;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Placeholder used when a monitor is opened on an unnamed output.
pub const DEFAULT_OUTPUT: &str = "output";

#[derive(Debug, Default)]
pub struct Resolver {
    /// Established from server node listings. First match wins.
    listed: HashMap<String, String>,
    /// Guesses from the type table or fallback.
    guessed: HashMap<String, String>,
    type_names: BTreeMap<String, String>,
}

impl Resolver {
    pub fn new(type_names: BTreeMap<String, String>) -> Resolver {
        Resolver {
            listed: HashMap::new(),
            guessed: HashMap::new(),
            type_names,
        }
    }

    pub fn resolve<G: GraphView + ?Sized>(
        &mut self,
        graph: &G,
        node_id: &str,
        output: &str,
    ) -> String {
        let output = if output.is_empty() {
            DEFAULT_OUTPUT
        } else {
            output
        };
        let server_node = self.server_node(graph, node_id);
        format!("{}.{}", server_node, output)
    }

    fn server_node<G: GraphView + ?Sized>(&mut self, graph: &G, node_id: &str) -> String {
        if let Some(name) = self.listed.get(node_id) {
            return name.clone();
        }
        if let Some(name) = self.guessed.get(node_id) {
            return name.clone();
        }
        let node_type = graph.node(node_id).map(|n| n.node_type).unwrap_or_default();
        let name = match self.type_names.get(&node_type) {
            Some(mapped) => mapped.clone(),
            None if !node_type.is_empty() => node_type.to_lowercase(),
            None => format!("node_{}", node_id.chars().take(4).collect::<String>()),
        };
        debug!(node = node_id, server_node = %name, "guessed server node name");
        self.guessed.insert(node_id.to_string(), name.clone());
        name
    }

    /// Learns node id mappings from a server listing. A node matches a
    /// server node when its type equals the server class, or its display
    /// name equals the server node name ignoring case. Returns the number of
    /// new mappings.
    pub fn apply_listing<G: GraphView + ?Sized>(
        &mut self,
        graph: &G,
        listing: &NodeListing,
    ) -> usize {
        let mut added = 0;
        for (node_id, info) in graph.nodes() {
            if self.listed.contains_key(&node_id) {
                continue;
            }
            let found = listing.nodes.iter().find(|(server_name, server)| {
                (!info.node_type.is_empty() && info.node_type == server.class)
                    || (!info.name.is_empty() && info.name.eq_ignore_ascii_case(server_name))
            });
            if let Some((server_name, _)) = found {
                debug!(node = %node_id, server_node = %server_name, "mapped node");
                self.listed.insert(node_id, server_name.clone());
                added += 1;
            }
        }
        added
    }

    /// Server node learned from a listing, if any.
    pub fn listed(&self, node_id: &str) -> Option<&str> {
        self.listed.get(node_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_type_names;
    use crate::pipeline::graph::Graph;
    use crate::wire::ServerNode;

    fn listing(nodes: &[(&str, &str)]) -> NodeListing {
        NodeListing {
            nodes: nodes
                .iter()
                .map(|(name, class)| {
                    (
                        name.to_string(),
                        ServerNode {
                            class: class.to_string(),
                            outputs: vec![],
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn cascade() {
        let mut graph = Graph::new();
        graph.insert("1111-aaaa", "PSF", "PSF");
        graph.insert("2222-bbbb", "Custom", "mine");
        graph.insert("3333-cccc", "", "");
        let mut resolver = Resolver::new(default_type_names());

        assert_eq!(resolver.resolve(&graph, "1111-aaaa", "out_psf"), "psf.out_psf");
        assert_eq!(resolver.resolve(&graph, "2222-bbbb", "x"), "custom.x");
        assert_eq!(resolver.resolve(&graph, "3333-cccc", "x"), "node_3333.x");
        assert_eq!(resolver.resolve(&graph, "1111-aaaa", ""), "psf.output");
        // unknown node ids still resolve
        assert_eq!(resolver.resolve(&graph, "ab", "x"), "node_ab.x");
    }

    #[test]
    fn listing_takes_precedence() {
        let mut graph = Graph::new();
        graph.insert("n1", "Custom", "Camera");
        graph.insert("n2", "PSF", "psf view");
        let mut resolver = Resolver::new(default_type_names());
        assert_eq!(resolver.resolve(&graph, "n1", "out"), "custom.out");

        let added = resolver.apply_listing(
            &graph,
            &listing(&[("camera", "SomethingElse"), ("psf_main", "PSF")]),
        );
        assert_eq!(added, 2);
        assert_eq!(resolver.resolve(&graph, "n1", "out"), "camera.out");
        assert_eq!(resolver.resolve(&graph, "n2", "out"), "psf_main.out");

        // first match is never overwritten
        resolver.apply_listing(&graph, &listing(&[("aaa", "PSF")]));
        assert_eq!(resolver.listed("n2"), Some("psf_main"));
    }
}
