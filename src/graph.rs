//! A minimal arena representation of a tensor compute graph.
//!
//! Graphs are built bottom-up, so every input of a node has a smaller
//! [NodeId] than the node itself and the graph is acyclic by construction.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::common::{DimSize, Shape};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    /// The output dtype as reported by the graph builder. Not validated here.
    pub dtype: String,
    pub attrs: BTreeMap<String, AttrValue>,
    pub op: Operation,
}

#[derive(Clone, Debug)]
pub enum Operation {
    /// A graph input with a declared shape.
    Placeholder { shape: Shape },
    /// A tagged tensor computation.
    Compute {
        tag: String,
        inputs: Vec<NodeId>,
        /// Extents of the output iteration axes.
        axis: Shape,
        /// Reduced dimensions of the first input. Negative values count from
        /// the innermost dimension.
        reduce_axis: Vec<i64>,
    },
    /// Anything else (extern calls, hybrid ops, scans). Never fingerprinted.
    Extern { kind: String, inputs: Vec<NodeId> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
    /// A value with no stable serialized form, such as a runtime handle.
    #[serde(skip)]
    Opaque(String),
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn placeholder(&mut self, name: &str, shape: &[DimSize], dtype: &str) -> NodeId {
        self.push(Node {
            name: name.to_owned(),
            dtype: dtype.to_owned(),
            attrs: BTreeMap::new(),
            op: Operation::Placeholder {
                shape: Shape::from_slice(shape),
            },
        })
    }

    /// Adds a computed node.
    ///
    /// Panics if any input does not already belong to this graph.
    pub fn compute(
        &mut self,
        name: &str,
        tag: &str,
        inputs: &[NodeId],
        axis: &[DimSize],
        dtype: &str,
    ) -> NodeId {
        self.assert_inputs_present(inputs);
        self.push(Node {
            name: name.to_owned(),
            dtype: dtype.to_owned(),
            attrs: BTreeMap::new(),
            op: Operation::Compute {
                tag: tag.to_owned(),
                inputs: inputs.to_vec(),
                axis: Shape::from_slice(axis),
                reduce_axis: vec![],
            },
        })
    }

    /// Adds a reduction over `reduce_axis` of the first input.
    pub fn reduce(
        &mut self,
        name: &str,
        tag: &str,
        inputs: &[NodeId],
        axis: &[DimSize],
        reduce_axis: &[i64],
        dtype: &str,
    ) -> NodeId {
        let id = self.compute(name, tag, inputs, axis, dtype);
        if let Operation::Compute {
            reduce_axis: ra, ..
        } = &mut self.nodes[id.0].op
        {
            ra.extend_from_slice(reduce_axis);
        }
        id
    }

    pub fn extern_op(&mut self, name: &str, kind: &str, inputs: &[NodeId], dtype: &str) -> NodeId {
        self.assert_inputs_present(inputs);
        self.push(Node {
            name: name.to_owned(),
            dtype: dtype.to_owned(),
            attrs: BTreeMap::new(),
            op: Operation::Extern {
                kind: kind.to_owned(),
                inputs: inputs.to_vec(),
            },
        })
    }

    /// Sets an attribute on an existing node. Does nothing for unknown ids.
    pub fn set_attr(&mut self, id: NodeId, key: &str, value: AttrValue) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.attrs.insert(key.to_owned(), value);
        }
    }

    /// Returns every node reachable from `outputs` in dependency order: inputs
    /// before consumers, leaves first, each node exactly once.
    ///
    /// Ids not belonging to this graph are emitted as-is and not expanded.
    pub fn topo_order(&self, outputs: &[NodeId]) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for &root in outputs {
            let mut stack = vec![(root, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                if !visited.insert(id) {
                    continue;
                }
                stack.push((id, true));
                let inputs = self.node(id).map(Node::inputs).unwrap_or(&[]);
                for &input in inputs.iter().rev() {
                    if !visited.contains(&input) {
                        stack.push((input, false));
                    }
                }
            }
        }
        order
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn assert_inputs_present(&self, inputs: &[NodeId]) {
        for input in inputs {
            assert!(
                input.0 < self.nodes.len(),
                "input {input} does not belong to this graph"
            );
        }
    }
}

impl Node {
    pub fn inputs(&self) -> &[NodeId] {
        match &self.op {
            Operation::Placeholder { .. } => &[],
            Operation::Compute { inputs, .. } | Operation::Extern { inputs, .. } => inputs,
        }
    }
}

impl AttrValue {
    /// Converts to JSON, or `None` if this value (or any nested value) has no
    /// stable serialized form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            AttrValue::Opaque(_) => None,
            AttrValue::Float(f) if !f.is_finite() => None,
            AttrValue::List(items) => items
                .iter()
                .map(AttrValue::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            _ => serde_json::to_value(self).ok(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_owned())
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        AttrValue::List(value.into_iter().map(AttrValue::Int).collect())
    }
}
