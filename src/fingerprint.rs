//! Structural fingerprints ("bank keys") of compute graphs.
//!
//! A bank key is the compact JSON serialization of one [NodeFeature] per node,
//! in dependency order. It is a sequence encoding, not a set hash: reordering
//! nodes changes both record order and every consumer index.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::common::{DimSize, Dtype, Shape};
use crate::graph::{Graph, Node, NodeId, Operation};
use crate::vocab::{self, PLACEHOLDER_TAG, SPECIAL_ATTRS};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BankKey(String);

#[derive(Clone, Debug, PartialEq)]
pub struct NodeFeature {
    pub tag_index: usize,
    pub spec_attrs: Vec<(usize, serde_json::Value)>,
    pub axis_extents: Shape,
    pub reduce_axis_indices: Vec<usize>,
    pub dtype_index: usize,
    pub consumer_indices: Vec<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Node {0} is not a placeholder or tagged compute op")]
    UnsupportedNode(String),
    #[error("Tag '{tag}' of node {node} is not in the tag vocabulary")]
    UnknownTag { node: String, tag: String },
    #[error("Dtype '{dtype}' of node {node} is not in the dtype vocabulary")]
    UnknownDtype { node: String, dtype: String },
    #[error("Node {0} does not belong to the graph")]
    MissingNode(NodeId),
    #[error("Failed to serialize node features: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
enum ReduceAxisError {
    #[error("reduction has no input")]
    NoInput,
    #[error("reduce axis {axis} out of range for rank {rank}")]
    OutOfRange { axis: i64, rank: usize },
}

impl BankKey {
    pub fn empty() -> Self {
        BankKey(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for BankKey {
    fn from(value: String) -> Self {
        BankKey(value)
    }
}

impl fmt::Display for BankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl EncodeError {
    /// Whether this failure must reach the caller instead of becoming an
    /// empty key.
    pub fn is_hard(&self) -> bool {
        matches!(self, EncodeError::UnknownDtype { .. })
    }
}

impl Serialize for NodeFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.spec_attrs.is_empty() { 5 } else { 6 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.tag_index)?;
        if !self.spec_attrs.is_empty() {
            seq.serialize_element(&self.spec_attrs)?;
        }
        seq.serialize_element(self.axis_extents.as_slice())?;
        seq.serialize_element(&self.reduce_axis_indices)?;
        seq.serialize_element(&self.dtype_index)?;
        seq.serialize_element(&self.consumer_indices)?;
        seq.end()
    }
}

/// Computes the bank key of the graph rooted at `outputs`.
///
/// Soft misses (unsupported node kinds, unknown tags, foreign node ids) yield
/// an empty key. An output dtype outside the dtype vocabulary is returned as
/// [EncodeError::UnknownDtype] and must be handled by the caller.
///
/// If `precomputed` is given it is used as the node order instead of walking
/// the graph.
pub fn bank_key(
    graph: &Graph,
    outputs: &[NodeId],
    precomputed: Option<&[NodeId]>,
) -> Result<BankKey, EncodeError> {
    match encode(graph, outputs, precomputed) {
        Ok(key) => Ok(key),
        Err(e) if e.is_hard() => Err(e),
        Err(e) => {
            log::debug!("No bank key: {}", e);
            Ok(BankKey::empty())
        }
    }
}

/// Computes the bank key, surfacing every failure.
pub fn encode(
    graph: &Graph,
    outputs: &[NodeId],
    precomputed: Option<&[NodeId]>,
) -> Result<BankKey, EncodeError> {
    let features = node_features(graph, outputs, precomputed)?;
    Ok(BankKey(serde_json::to_string(&features)?))
}

pub fn node_features(
    graph: &Graph,
    outputs: &[NodeId],
    precomputed: Option<&[NodeId]>,
) -> Result<Vec<NodeFeature>, EncodeError> {
    let walked;
    let order = match precomputed {
        Some(order) => order,
        None => {
            walked = graph.topo_order(outputs);
            &walked
        }
    };

    let nodes = order
        .iter()
        .map(|&id| graph.node(id).ok_or(EncodeError::MissingNode(id)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut consumers: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for (position, node) in nodes.iter().enumerate() {
        for input in node.inputs() {
            let entry = consumers.entry(*input).or_default();
            if entry.last() != Some(&position) {
                entry.push(position);
            }
        }
    }

    order
        .iter()
        .zip(nodes)
        .map(|(id, node)| {
            let consumer_indices = consumers.remove(id).unwrap_or_default();
            node_feature(graph, node, consumer_indices)
        })
        .collect()
}

fn node_feature(
    graph: &Graph,
    node: &Node,
    consumer_indices: Vec<usize>,
) -> Result<NodeFeature, EncodeError> {
    let (tag, axis_extents, reduce_axis_indices) = match &node.op {
        Operation::Placeholder { shape } => (PLACEHOLDER_TAG, shape.clone(), vec![]),
        Operation::Compute {
            tag,
            inputs,
            axis,
            reduce_axis,
        } => {
            let reduce_axis_indices = if reduce_axis.is_empty() {
                vec![]
            } else {
                reduce_indices(graph, inputs, reduce_axis).unwrap_or_else(|e| {
                    log::debug!("Ignoring reduce axes of {}: {}", node.name, e);
                    vec![]
                })
            };
            (tag.as_str(), axis.clone(), reduce_axis_indices)
        }
        Operation::Extern { .. } => return Err(EncodeError::UnsupportedNode(node.name.clone())),
    };

    let tag_index = vocab::tag_index(tag).ok_or_else(|| EncodeError::UnknownTag {
        node: node.name.clone(),
        tag: tag.to_owned(),
    })?;

    let spec_attrs = SPECIAL_ATTRS
        .iter()
        .enumerate()
        .filter_map(|(idx, key)| {
            let value = node.attrs.get(*key)?;
            let json = value.to_json();
            if json.is_none() {
                log::debug!("Skipping attribute {} of {}", key, node.name);
            }
            json.map(|v| (idx, v))
        })
        .collect();

    let dtype = node
        .dtype
        .parse::<Dtype>()
        .map_err(|_| EncodeError::UnknownDtype {
            node: node.name.clone(),
            dtype: node.dtype.clone(),
        })?;

    Ok(NodeFeature {
        tag_index,
        spec_attrs,
        axis_extents,
        reduce_axis_indices,
        dtype_index: dtype.vocab_index(),
        consumer_indices,
    })
}

/// Normalizes reduce axes against the rank of the reduction's first input.
fn reduce_indices(
    graph: &Graph,
    inputs: &[NodeId],
    reduce_axis: &[i64],
) -> Result<Vec<usize>, ReduceAxisError> {
    let source = inputs
        .first()
        .and_then(|id| graph.node(*id))
        .ok_or(ReduceAxisError::NoInput)?;
    let rank = output_extents(source).len();
    let mut indices = reduce_axis
        .iter()
        .map(|&axis| {
            let normalized = if axis < 0 { axis + rank as i64 } else { axis };
            usize::try_from(normalized)
                .ok()
                .filter(|&n| n < rank)
                .ok_or(ReduceAxisError::OutOfRange { axis, rank })
        })
        .collect::<Result<Vec<_>, _>>()?;
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

fn output_extents(node: &Node) -> &[DimSize] {
    match &node.op {
        Operation::Placeholder { shape } => shape,
        Operation::Compute { axis, .. } => axis,
        Operation::Extern { .. } => &[],
    }
}
