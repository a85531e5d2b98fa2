//!
//! the transducer composition algebra
//!
//! Every operator builds a new `Machine` from borrowed operands. State 0 of
//! the result is its start and the last state its end; operators preserve
//! that invariant by construction (compose reorders its product states so
//! the end pair is last, appending it even when unreachable so that an
//! empty-language composition evaluates to -inf instead of failing).
//!
use super::{Machine, MachineEdge};
use crate::common::{InputSymbol, OutputSymbol};
use crate::expr::WeightExpr;
use fnv::{FnvHashMap, FnvHashSet};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::VecDeque;

impl Machine {
    ///
    /// The trivial one-state identity machine (start = end, no transitions).
    ///
    pub fn null() -> Machine {
        let mut graph = DiGraph::new();
        graph.add_node("0".to_string());
        Machine { graph }
    }

    fn is_null(&self) -> bool {
        self.n_states() == 1 && self.n_transitions() == 0
    }

    ///
    /// Linear chain that deterministically emits `seq` (no input).
    ///
    pub fn generator(name: &str, seq: &[OutputSymbol]) -> Machine {
        let mut graph = DiGraph::new();
        let mut prev = graph.add_node(format!("{}:0", name));
        for (i, sym) in seq.iter().enumerate() {
            let next = graph.add_node(format!("{}:{}", name, i + 1));
            graph.add_edge(
                prev,
                next,
                MachineEdge::new(None, Some(sym.clone()), WeightExpr::one()),
            );
            prev = next;
        }
        Machine { graph }
    }

    ///
    /// Linear chain that deterministically consumes `seq` (no output).
    ///
    pub fn acceptor(name: &str, seq: &[InputSymbol]) -> Machine {
        let mut graph = DiGraph::new();
        let mut prev = graph.add_node(format!("{}:0", name));
        for (i, sym) in seq.iter().enumerate() {
            let next = graph.add_node(format!("{}:{}", name, i + 1));
            graph.add_edge(
                prev,
                next,
                MachineEdge::new(Some(sym.clone()), None, WeightExpr::one()),
            );
            prev = next;
        }
        Machine { graph }
    }

    ///
    /// Synchronous product ("pipe"): `a`'s outputs feed `b`'s inputs.
    ///
    /// States are reachable pairs `(stateA, stateB)` in BFS order; joint
    /// moves require `a.output == b.input` and multiply the weights, while
    /// either side may advance alone on a transition that does not touch
    /// the shared tape. Disjoint alphabets are legal: the (appended) end
    /// pair is simply unreachable and every evaluation yields -inf.
    ///
    pub fn compose(a: &Machine, b: &Machine) -> Machine {
        // the null machine is the identity of composition
        if a.is_null() {
            return b.clone();
        }
        if b.is_null() {
            return a.clone();
        }

        type Pair = (NodeIndex, NodeIndex);
        let start = (a.start(), b.start());
        let end = (a.end(), b.end());

        let successors = |(i, j): Pair| -> Vec<(MachineEdge, Pair)> {
            let mut succ = Vec::new();
            for (_, i2, ea) in a.outgoing(i) {
                match &ea.output {
                    // a advances alone (nothing written to the shared tape)
                    None => succ.push((
                        MachineEdge::new(ea.input.clone(), None, ea.weight.clone()),
                        (i2, j),
                    )),
                    Some(sym) => {
                        for (_, j2, eb) in b.outgoing(j) {
                            if eb.input.as_deref() == Some(sym.as_str()) {
                                succ.push((
                                    MachineEdge::new(
                                        ea.input.clone(),
                                        eb.output.clone(),
                                        WeightExpr::mul(&ea.weight, &eb.weight),
                                    ),
                                    (i2, j2),
                                ));
                            }
                        }
                    }
                }
            }
            for (_, j2, eb) in b.outgoing(j) {
                // b advances alone (nothing read from the shared tape)
                if eb.input.is_none() {
                    succ.push((
                        MachineEdge::new(None, eb.output.clone(), eb.weight.clone()),
                        (i, j2),
                    ));
                }
            }
            succ
        };

        // discover reachable pairs
        let mut order: Vec<Pair> = vec![start];
        let mut seen: FnvHashSet<Pair> = FnvHashSet::default();
        seen.insert(start);
        let mut queue: VecDeque<Pair> = VecDeque::new();
        queue.push_back(start);
        let mut edges: Vec<(Pair, Pair, MachineEdge)> = Vec::new();
        while let Some(pair) = queue.pop_front() {
            for (edge, dest) in successors(pair) {
                if seen.insert(dest) {
                    order.push(dest);
                    queue.push_back(dest);
                }
                edges.push((pair, dest, edge));
            }
        }
        if !seen.contains(&end) {
            order.push(end);
        }
        // the end pair must be the last state
        order.retain(|&pair| pair != end);
        order.push(end);

        let mut graph = DiGraph::new();
        let mut index: FnvHashMap<Pair, NodeIndex> = FnvHashMap::default();
        for &(i, j) in &order {
            let node = graph.add_node(format!("({},{})", a.label(i), b.label(j)));
            index.insert((i, j), node);
        }
        for (src, dest, edge) in edges {
            graph.add_edge(index[&src], index[&dest], edge);
        }
        Machine { graph }
    }

    ///
    /// Sequential concatenation: `a` then `b`, bridged by a silent
    /// transition from `a`'s end to `b`'s start.
    ///
    pub fn concatenate(a: &Machine, b: &Machine) -> Machine {
        let mut graph = a.graph.clone();
        let offset = a.n_states();
        for i in 0..b.n_states() {
            graph.add_node(b.label(NodeIndex::new(i)).to_string());
        }
        for (_, src, dest, edge) in b.transitions() {
            graph.add_edge(
                NodeIndex::new(src.index() + offset),
                NodeIndex::new(dest.index() + offset),
                edge.clone(),
            );
        }
        graph.add_edge(
            a.end(),
            NodeIndex::new(b.start().index() + offset),
            MachineEdge::silent(WeightExpr::one()),
        );
        Machine { graph }
    }

    ///
    /// Weighted union: new start with silent branches to both operands
    /// (weighted `w` and `1-w` when given, weight 1 otherwise), new shared
    /// end reached silently from both operands' ends.
    ///
    pub fn union_of(a: &Machine, b: &Machine, weight: Option<WeightExpr>) -> Machine {
        let (w_a, w_b) = match weight {
            Some(w) => {
                let w_b = WeightExpr::sub(&WeightExpr::one(), &w);
                (w, w_b)
            }
            None => (WeightExpr::one(), WeightExpr::one()),
        };

        let mut graph = DiGraph::new();
        let start = graph.add_node("start".to_string());
        let offset_a = 1;
        for i in 0..a.n_states() {
            graph.add_node(a.label(NodeIndex::new(i)).to_string());
        }
        let offset_b = offset_a + a.n_states();
        for i in 0..b.n_states() {
            graph.add_node(b.label(NodeIndex::new(i)).to_string());
        }
        let end = graph.add_node("end".to_string());

        for (_, src, dest, edge) in a.transitions() {
            graph.add_edge(
                NodeIndex::new(src.index() + offset_a),
                NodeIndex::new(dest.index() + offset_a),
                edge.clone(),
            );
        }
        for (_, src, dest, edge) in b.transitions() {
            graph.add_edge(
                NodeIndex::new(src.index() + offset_b),
                NodeIndex::new(dest.index() + offset_b),
                edge.clone(),
            );
        }
        graph.add_edge(
            start,
            NodeIndex::new(a.start().index() + offset_a),
            MachineEdge::silent(w_a),
        );
        graph.add_edge(
            start,
            NodeIndex::new(b.start().index() + offset_b),
            MachineEdge::silent(w_b),
        );
        graph.add_edge(
            NodeIndex::new(a.end().index() + offset_a),
            end,
            MachineEdge::silent(WeightExpr::one()),
        );
        graph.add_edge(
            NodeIndex::new(b.end().index() + offset_b),
            end,
            MachineEdge::silent(WeightExpr::one()),
        );
        Machine { graph }
    }

    ///
    /// Kleene closure: a silent back-transition from end to start weighted
    /// `geometric_sum(loop_weight)` (weight 1 when unparameterized), plus a
    /// silent bypass so zero repetitions are accepted.
    ///
    pub fn kleene_closure(&self, loop_weight: Option<WeightExpr>) -> Machine {
        let back = match loop_weight {
            Some(w) => WeightExpr::geometric_sum(&w),
            None => WeightExpr::one(),
        };
        let mut graph = self.graph.clone();
        graph.add_edge(self.end(), self.start(), MachineEdge::silent(back));
        if self.start() != self.end() {
            graph.add_edge(
                self.start(),
                self.end(),
                MachineEdge::silent(WeightExpr::one()),
            );
        }
        Machine { graph }
    }
}
