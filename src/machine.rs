//!
//! weighted finite-state transducers
//!
//! A `Machine` maps an input symbol sequence to an output symbol sequence
//! through transitions carrying symbolic weight expressions. Machines are
//! immutable values: the composition operators in [`compose`] build new
//! machines from borrowed operands and never mutate them.
//!
//! Invariant: node 0 is the unique start state and the last node is the
//! unique end state. A machine whose end is unreachable is still
//! structurally legal; it simply has no finite-weight accepting path.
//!
pub mod compose;
pub mod evaluated;

use crate::common::{InputSymbol, OutputSymbol};
use crate::expr::WeightExpr;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::BTreeSet;

///
/// A transition: optional input symbol, optional output symbol, and a
/// symbolic weight. Both symbols absent = silent (epsilon) transition.
///
#[derive(Debug, Clone, PartialEq)]
pub struct MachineEdge {
    pub input: Option<InputSymbol>,
    pub output: Option<OutputSymbol>,
    pub weight: WeightExpr,
}

impl MachineEdge {
    pub fn new(
        input: Option<InputSymbol>,
        output: Option<OutputSymbol>,
        weight: WeightExpr,
    ) -> MachineEdge {
        MachineEdge {
            input,
            output,
            weight,
        }
    }
    pub fn silent(weight: WeightExpr) -> MachineEdge {
        MachineEdge::new(None, None, weight)
    }
    pub fn is_silent(&self) -> bool {
        self.input.is_none() && self.output.is_none()
    }
}

impl std::fmt::Display for MachineEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.input.as_deref().unwrap_or("-"),
            self.output.as_deref().unwrap_or("-"),
            self.weight
        )
    }
}

///
/// A weighted finite-state transducer over a petgraph digraph.
///
/// Node weights are display labels; all semantics live on the edges.
///
#[derive(Debug, Clone)]
pub struct Machine {
    pub(crate) graph: DiGraph<String, MachineEdge>,
}

impl Machine {
    ///
    /// Wrap an externally-built state graph. The caller upholds the
    /// invariant that node 0 is the start state and the last node the end
    /// state.
    ///
    pub fn from_graph(graph: DiGraph<String, MachineEdge>) -> Machine {
        assert!(graph.node_count() > 0, "a machine needs at least one state");
        Machine { graph }
    }
    pub fn n_states(&self) -> usize {
        self.graph.node_count()
    }
    pub fn n_transitions(&self) -> usize {
        self.graph.edge_count()
    }
    pub fn start(&self) -> NodeIndex {
        NodeIndex::new(0)
    }
    pub fn end(&self) -> NodeIndex {
        NodeIndex::new(self.n_states() - 1)
    }
    pub fn label(&self, state: NodeIndex) -> &str {
        self.graph.node_weight(state).unwrap()
    }
    pub fn edge(&self, e: EdgeIndex) -> &MachineEdge {
        self.graph.edge_weight(e).unwrap()
    }
    ///
    /// Iterate all transitions as `(EdgeIndex, source, target, &MachineEdge)`.
    ///
    pub fn transitions(
        &self,
    ) -> impl Iterator<Item = (EdgeIndex, NodeIndex, NodeIndex, &MachineEdge)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.id(), e.source(), e.target(), e.weight()))
    }
    ///
    /// Outgoing transitions of a state as `(EdgeIndex, target, &MachineEdge)`.
    ///
    pub fn outgoing(
        &self,
        state: NodeIndex,
    ) -> impl Iterator<Item = (EdgeIndex, NodeIndex, &MachineEdge)> + '_ {
        self.graph
            .edges(state)
            .map(|e| (e.id(), e.target(), e.weight()))
    }
    pub fn input_alphabet(&self) -> BTreeSet<&str> {
        self.transitions()
            .filter_map(|(_, _, _, e)| e.input.as_deref())
            .collect()
    }
    pub fn output_alphabet(&self) -> BTreeSet<&str> {
        self.transitions()
            .filter_map(|(_, _, _, e)| e.output.as_deref())
            .collect()
    }
}

impl std::fmt::Display for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (_, src, dest, edge) in self.transitions() {
            writeln!(
                f,
                "{} -> {}\t{}",
                self.label(src),
                self.label(dest),
                edge
            )?;
        }
        Ok(())
    }
}

///
/// A path through a machine: the transition sequence reconstructed by
/// Viterbi traceback, in forward order.
///
#[derive(Debug, Clone, Default)]
pub struct MachinePath {
    pub trans: Vec<EdgeIndex>,
}

impl MachinePath {
    pub fn len(&self) -> usize {
        self.trans.len()
    }
    pub fn is_empty(&self) -> bool {
        self.trans.is_empty()
    }
    /// Project the path onto its consumed input symbols.
    pub fn to_inputs(&self, machine: &Machine) -> Vec<InputSymbol> {
        self.trans
            .iter()
            .filter_map(|&e| machine.edge(e).input.clone())
            .collect()
    }
    /// Project the path onto its emitted output symbols.
    pub fn to_outputs(&self, machine: &Machine) -> Vec<OutputSymbol> {
        self.trans
            .iter()
            .filter_map(|&e| machine.edge(e).output.clone())
            .collect()
    }
}
