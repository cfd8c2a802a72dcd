//! Executable form of a genotype.
//!
//! A [`Phenotype`] is built once from a genotype snapshot by walking backward
//! from the output slots, and is never mutated afterward; it becomes stale the
//! instant its source genotype mutates and must then be rebuilt. Nodes are
//! densely indexed in an order compatible with a single forward sweep: every
//! intermediate fetch references a lower index, every recurrent fetch an equal
//! or higher one, and the output nodes occupy the trailing slots.
//!
//! Cross-timestep state lives in recurrent registers: one persisted scalar per
//! entry of [`Phenotype::recurrent_node_indices`], owned by whoever runs the
//! phenotype. The host interpreter ([`Phenotype::execute`]) reads the caller's
//! register slice before the sweep and writes it back after; generated kernel
//! code receives one pointer parameter per register instead.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::function::FunctionTable;
use crate::genotype::{Genotype, NodeId};

/// Where an edge fetches its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// External input slot.
    Input(usize),
    /// Previous sweep's value of the phenotype node at this index.
    Recurrent(usize),
    /// Current sweep's value of the (lower-indexed) phenotype node.
    Intermediate(usize),
}

/// A classified, weighted incoming edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub source: Fetch,
    pub weight: f32,
}

/// One densely indexed phenotype node.
#[derive(Debug, Clone, PartialEq)]
pub struct PhenotypeNode {
    pub bias: f32,
    pub function: usize,
    pub connections: Vec<Connection>,
}

/// Edge classification before final indices are known: recurrent fetches are
/// recorded by visit index, intermediate ones by node ID.
enum Raw {
    Input(usize),
    Recurrent(usize),
    Pending(NodeId),
}

/// Minimal forward-executable form of a [`Genotype`].
#[derive(Debug, Clone)]
pub struct Phenotype {
    nodes: Vec<PhenotypeNode>,
    num_inputs: usize,
    num_outputs: usize,
    recurrent_node_indices: Vec<usize>,
    /// Working values, one per node. Carries previous-sweep outputs from
    /// register seeding into the sweep.
    values: Vec<f32>,
}

impl Phenotype {
    /// Build the minimal executable network for `genotype`.
    ///
    /// Only nodes reachable backward from an output slot are included.
    ///
    /// # Panics
    ///
    /// Panics if an output slot or a connection references a node ID absent
    /// from the genotype's node set (a structural-invariant violation).
    #[must_use]
    pub fn from_genotype(genotype: &Genotype) -> Self {
        let num_inputs = genotype.num_inputs();
        let num_outputs = genotype.num_outputs();

        let input_slot: HashMap<NodeId, usize> = genotype
            .input_ids
            .iter()
            .enumerate()
            .map(|(slot, &id)| (id, slot))
            .collect();

        let mut index_of: HashMap<NodeId, usize> = HashMap::new();
        let mut queued: HashSet<NodeId> = HashSet::new();
        let mut open: VecDeque<NodeId> = VecDeque::new();

        // Outputs are seeded in reverse so that after the final order flip,
        // output slot i lands at node index (len - num_outputs + i)
        for &id in genotype.output_ids.iter().rev() {
            assert!(
                genotype.nodes.contains_key(&id),
                "output slot references missing node {id:?}"
            );
            if queued.insert(id) {
                open.push_back(id);
            }
        }

        let mut visited: Vec<(f32, usize, Vec<(Raw, f32)>)> = Vec::new();
        let mut recurrent_visit_indices: Vec<usize> = Vec::new();
        let mut recurrent_seen: HashSet<usize> = HashSet::new();

        while let Some(id) = open.pop_front() {
            index_of.insert(id, visited.len());

            let node = &genotype.nodes[&id];
            let mut connections = Vec::with_capacity(node.connections.len());

            for (&source, &weight) in &node.connections {
                let raw = if let Some(&slot) = input_slot.get(&source) {
                    Raw::Input(slot)
                } else if let Some(&source_index) = index_of.get(&source) {
                    // The source was already processed: this edge closes a
                    // cycle, so its value must come from the previous sweep
                    if recurrent_seen.insert(source_index) {
                        recurrent_visit_indices.push(source_index);
                    }
                    Raw::Recurrent(source_index)
                } else {
                    assert!(
                        genotype.nodes.contains_key(&source),
                        "connection references missing node {source:?}"
                    );
                    if queued.insert(source) {
                        open.push_back(source);
                    }
                    Raw::Pending(source)
                };

                connections.push((raw, weight));
            }

            visited.push((node.bias, node.function, connections));
        }

        // Flip into dependency order and remap every provisional index
        let len = visited.len();
        let flip = |visit_index: usize| len - 1 - visit_index;

        let mut nodes: Vec<PhenotypeNode> = Vec::with_capacity(len);

        for (bias, function, connections) in visited.into_iter().rev() {
            let connections = connections
                .into_iter()
                .map(|(raw, weight)| Connection {
                    source: match raw {
                        Raw::Input(slot) => Fetch::Input(slot),
                        Raw::Recurrent(visit_index) => Fetch::Recurrent(flip(visit_index)),
                        Raw::Pending(id) => Fetch::Intermediate(flip(index_of[&id])),
                    },
                    weight,
                })
                .collect();

            nodes.push(PhenotypeNode {
                bias,
                function,
                connections,
            });
        }

        let recurrent_node_indices: Vec<usize> =
            recurrent_visit_indices.into_iter().map(flip).collect();

        assert!(
            !nodes.is_empty() || (num_inputs == 0 && num_outputs == 0),
            "zero-node phenotype requires zero inputs and outputs"
        );

        Self {
            values: vec![0.0; nodes.len()],
            nodes,
            num_inputs,
            num_outputs,
            recurrent_node_indices,
        }
    }

    /// Run one forward sweep.
    ///
    /// `registers` carries the recurrent state across invocations: slot `i`
    /// seeds the previous-sweep value of node `recurrent_node_indices[i]`
    /// before the sweep and receives its freshly computed value afterward.
    /// Recurrent fetches always observe the previous sweep, never a value
    /// computed earlier in the same call.
    ///
    /// # Panics
    ///
    /// Panics if `inputs`, `outputs` or `registers` do not match the
    /// phenotype's counts exactly.
    pub fn execute(
        &mut self,
        inputs: &[f32],
        outputs: &mut [f32],
        registers: &mut [f32],
        table: &FunctionTable,
    ) {
        assert_eq!(
            inputs.len(),
            self.num_inputs,
            "input length mismatch: expected {}, got {}",
            self.num_inputs,
            inputs.len()
        );
        assert_eq!(
            outputs.len(),
            self.num_outputs,
            "output length mismatch: expected {}, got {}",
            self.num_outputs,
            outputs.len()
        );
        assert_eq!(
            registers.len(),
            self.recurrent_node_indices.len(),
            "recurrent register length mismatch: expected {}, got {}",
            self.recurrent_node_indices.len(),
            registers.len()
        );

        for (i, &index) in self.recurrent_node_indices.iter().enumerate() {
            self.values[index] = registers[i];
        }

        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];
            let mut sum = node.bias;

            for connection in &node.connections {
                let value = match connection.source {
                    Fetch::Input(slot) => inputs[slot],
                    Fetch::Recurrent(i) | Fetch::Intermediate(i) => self.values[i],
                };
                sum += connection.weight * value;
            }

            self.values[index] = table.eval(node.function, sum);
        }

        for (i, &index) in self.recurrent_node_indices.iter().enumerate() {
            registers[i] = self.values[index];
        }

        let first_output = self.nodes.len() - self.num_outputs;
        outputs.copy_from_slice(&self.values[first_output..]);
    }

    /// Number of input slots.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Number of output slots.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Number of recurrent registers the caller must persist.
    #[must_use]
    pub fn recurrent_len(&self) -> usize {
        self.recurrent_node_indices.len()
    }

    /// The densely indexed node list, in sweep order.
    #[must_use]
    pub fn nodes(&self) -> &[PhenotypeNode] {
        &self.nodes
    }

    /// Indices of nodes whose output is persisted across sweeps, in register
    /// order.
    #[must_use]
    pub fn recurrent_node_indices(&self) -> &[usize] {
        &self.recurrent_node_indices
    }
}
