//!
//! numeric, DP-ready view of a machine under a fixed parameter assignment
//!
//! Rebuilt whenever the assignment changes (every M-step); never mutated in
//! place. Symbols are interned to dense tokens (0 = epsilon), weights are
//! reduced to log space, and transitions are indexed the ways the DP engine
//! consumes them: output-free transitions ("null" for the DP: they advance
//! within a column, whether or not they consume input) in an order that
//! lets a single pass reach the in-column fixpoint when their subgraph is
//! acyclic, emitting transitions grouped by destination state and by
//! output token, and incoming transitions per state for traceback.
//!
use super::Machine;
use crate::common::{
    InputSymbol, InputToken, OutputSymbol, OutputToken, StateIndex, TransIndex, UNKNOWN_TOKEN,
};
use crate::error::Result;
use crate::params::Params;
use fnv::FnvHashMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

///
/// A transition with its weight evaluated to a numeric log value.
///
#[derive(Debug, Clone)]
pub struct EvaluatedTrans {
    pub src: StateIndex,
    pub dest: StateIndex,
    /// interned input symbol; 0 = none
    pub in_tok: InputToken,
    /// interned output symbol; 0 = none
    pub out_tok: OutputToken,
    pub log_weight: f64,
    /// the originating edge in the machine, for path reconstruction
    pub edge: EdgeIndex,
}

impl EvaluatedTrans {
    pub fn is_silent(&self) -> bool {
        self.in_tok == 0 && self.out_tok == 0
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatedMachine {
    pub n_states: usize,
    /// token `t` (>= 1) names `input_syms[t-1]`
    pub input_syms: Vec<InputSymbol>,
    pub output_syms: Vec<OutputSymbol>,
    in_tokens: FnvHashMap<InputSymbol, InputToken>,
    out_tokens: FnvHashMap<OutputSymbol, OutputToken>,
    pub trans: Vec<EvaluatedTrans>,
    /// output-free transitions, ordered for single-pass in-column application
    pub null_trans: Vec<TransIndex>,
    /// output-emitting transitions grouped by destination state
    pub emit_by_dest: Vec<Vec<TransIndex>>,
    /// output-emitting transitions grouped by output token
    pub emit_by_tok: Vec<Vec<TransIndex>>,
    /// all transitions grouped by destination state (traceback)
    pub incoming: Vec<Vec<TransIndex>>,
    /// all transitions grouped by source state (backward sweeps)
    pub outgoing: Vec<Vec<TransIndex>>,
    /// the emitting self-loop of each state, if any (trace DP)
    pub loop_of: Vec<Option<TransIndex>>,
    /// silent subgraph acyclic: one null pass per column suffices
    pub silent_acyclic: bool,
}

impl EvaluatedMachine {
    pub fn new(machine: &Machine, params: &Params) -> Result<EvaluatedMachine> {
        let n_states = machine.n_states();

        let input_syms: Vec<InputSymbol> = machine
            .input_alphabet()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let output_syms: Vec<OutputSymbol> = machine
            .output_alphabet()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let in_tokens: FnvHashMap<InputSymbol, InputToken> = input_syms
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i + 1))
            .collect();
        let out_tokens: FnvHashMap<OutputSymbol, OutputToken> = output_syms
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i + 1))
            .collect();

        let mut trans = Vec::with_capacity(machine.n_transitions());
        for (edge, src, dest, e) in machine.transitions() {
            let weight = e.weight.eval(params)?;
            trans.push(EvaluatedTrans {
                src: src.index(),
                dest: dest.index(),
                in_tok: e.input.as_ref().map_or(0, |s| in_tokens[s]),
                out_tok: e.output.as_ref().map_or(0, |s| out_tokens[s]),
                log_weight: weight.ln(),
                edge,
            });
        }

        // order output-free transitions so sources precede destinations
        let mut silent_graph: DiGraph<(), ()> = DiGraph::new();
        for _ in 0..n_states {
            silent_graph.add_node(());
        }
        let mut null_trans: Vec<TransIndex> = Vec::new();
        for (ti, t) in trans.iter().enumerate() {
            if t.out_tok == 0 {
                null_trans.push(ti);
                silent_graph.add_edge(NodeIndex::new(t.src), NodeIndex::new(t.dest), ());
            }
        }
        let silent_acyclic = match toposort(&silent_graph, None) {
            Ok(order) => {
                let mut pos = vec![0; n_states];
                for (i, node) in order.iter().enumerate() {
                    pos[node.index()] = i;
                }
                null_trans.sort_by_key(|&ti| pos[trans[ti].src]);
                true
            }
            Err(_) => false,
        };

        let mut emit_by_dest = vec![Vec::new(); n_states];
        let mut emit_by_tok = vec![Vec::new(); output_syms.len() + 1];
        let mut incoming = vec![Vec::new(); n_states];
        let mut outgoing = vec![Vec::new(); n_states];
        let mut loop_of = vec![None; n_states];
        for (ti, t) in trans.iter().enumerate() {
            incoming[t.dest].push(ti);
            outgoing[t.src].push(ti);
            if t.out_tok != 0 {
                emit_by_dest[t.dest].push(ti);
                emit_by_tok[t.out_tok].push(ti);
                if t.src == t.dest && loop_of[t.src].is_none() {
                    loop_of[t.src] = Some(ti);
                }
            }
        }

        Ok(EvaluatedMachine {
            n_states,
            input_syms,
            output_syms,
            in_tokens,
            out_tokens,
            trans,
            null_trans,
            emit_by_dest,
            emit_by_tok,
            incoming,
            outgoing,
            loop_of,
            silent_acyclic,
        })
    }

    pub fn start(&self) -> StateIndex {
        0
    }
    pub fn end(&self) -> StateIndex {
        self.n_states - 1
    }
    pub fn n_trans(&self) -> usize {
        self.trans.len()
    }
    pub fn out_token(&self, sym: &str) -> Option<OutputToken> {
        self.out_tokens.get(sym).copied()
    }
    pub fn in_token(&self, sym: &str) -> Option<InputToken> {
        self.in_tokens.get(sym).copied()
    }
    ///
    /// Intern an output sequence; symbols outside the machine's output
    /// alphabet map to `UNKNOWN_TOKEN` (they can match no transition).
    ///
    pub fn tokenize_outputs(&self, seq: &[OutputSymbol]) -> Vec<OutputToken> {
        seq.iter()
            .map(|s| self.out_token(s).unwrap_or(UNKNOWN_TOKEN))
            .collect()
    }
}
