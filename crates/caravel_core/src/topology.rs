use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::region::RegionTag;

/// Identity of one gateway slot in the overlay: a region plus an instance
/// index within that region.
///
/// Nodes carry no reference to the server they are bound to; the binding lives
/// in the client's flat `bound_nodes` map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GatewayNode {
    pub region: RegionTag,
    pub instance: u32,
}

impl GatewayNode {
    pub fn new(region: RegionTag, instance: u32) -> Self {
        GatewayNode { region, instance }
    }
}

impl fmt::Display for GatewayNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.instance)
    }
}

/// Directed overlay of gateway nodes with per-edge connection counts.
///
/// The control plane consumes the source set, the sink set, and the outgoing
/// edge map; it never inspects intermediate relay structure beyond that.
#[derive(Debug, Clone)]
pub struct Topology {
    gateways: Vec<GatewayNode>,
    sources: Vec<GatewayNode>,
    sinks: Vec<GatewayNode>,
    edges: HashMap<GatewayNode, HashMap<GatewayNode, u32>>,
}

impl Topology {
    pub fn new(
        gateways: Vec<GatewayNode>,
        sources: Vec<GatewayNode>,
        sinks: Vec<GatewayNode>,
        edges: HashMap<GatewayNode, HashMap<GatewayNode, u32>>,
    ) -> Result<Self> {
        let known: HashSet<&GatewayNode> = gateways.iter().collect();
        for node in sources.iter().chain(sinks.iter()) {
            if !known.contains(node) {
                return Err(Error::UnknownGatewayNode(node.to_string()));
            }
        }
        for (node, peers) in &edges {
            if !known.contains(node) {
                return Err(Error::UnknownGatewayNode(node.to_string()));
            }
            if let Some(peer) = peers.keys().find(|p| !known.contains(p)) {
                return Err(Error::UnknownGatewayNode(peer.to_string()));
            }
        }
        Ok(Topology {
            gateways,
            sources,
            sinks,
            edges,
        })
    }

    /// Single-hop overlay: one source gateway connected straight to one sink.
    pub fn direct(source: RegionTag, sink: RegionTag, num_connections: u32) -> Self {
        let src = GatewayNode::new(source, 0);
        let dst = GatewayNode::new(sink, 0);
        let mut edges = HashMap::new();
        edges.insert(
            src.clone(),
            HashMap::from([(dst.clone(), num_connections)]),
        );
        Topology {
            gateways: vec![src.clone(), dst.clone()],
            sources: vec![src],
            sinks: vec![dst],
            edges,
        }
    }

    /// Every gateway node, in topology order.
    pub fn gateway_nodes(&self) -> &[GatewayNode] {
        &self.gateways
    }

    /// Gateways that read chunks from the source object store.
    pub fn source_instances(&self) -> &[GatewayNode] {
        &self.sources
    }

    /// Gateways that perform the terminal upload.
    pub fn sink_instances(&self) -> &[GatewayNode] {
        &self.sinks
    }

    pub fn source_regions(&self) -> HashSet<RegionTag> {
        self.sources.iter().map(|n| n.region.clone()).collect()
    }

    pub fn sink_regions(&self) -> HashSet<RegionTag> {
        self.sinks.iter().map(|n| n.region.clone()).collect()
    }

    /// Outgoing edges of `node`: peer node to number of data-plane connections.
    pub fn outgoing_paths(&self, node: &GatewayNode) -> HashMap<GatewayNode, u32> {
        self.edges.get(node).cloned().unwrap_or_default()
    }
}
