//! Evolvable rule-graph genotype.
//!
//! A [`Genotype`] is a directed, possibly cyclic graph of nodes keyed by
//! stable integer IDs. Cycles are not an error: they are the mechanism for
//! persistent state, and become recurrent registers when the graph is lowered
//! to a [`Phenotype`](crate::phenotype::Phenotype).
//!
//! Node identity is lineage-wide: `next_node_id` increases monotonically and
//! is carried through crossover as the max of both parents, so IDs minted by
//! future mutations never collide with either lineage. All edges are ID
//! references resolved through the owning map; operations that could leave a
//! reference dangling (crossover across disjoint lineages) prune before
//! returning.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::function::roulette;

/// Stable node identifier, unique for the lifetime of a lineage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

/// A single graph node: bias, activation-function index, and weighted
/// incoming edges keyed by source node ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub bias: f32,
    /// Index into the shared [`FunctionTable`](crate::function::FunctionTable).
    pub function: usize,
    /// Incoming edges: source node ID to weight.
    pub connections: BTreeMap<NodeId, f32>,
}

/// Configuration for genotype initialization and mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenotypeConfig {
    /// Initial weights and biases are drawn uniformly from
    /// `[-weight_range, weight_range]`.
    pub weight_range: f32,
    /// Probability that one mutation call splits a connection with a new node.
    pub add_node_chance: f32,
    /// Probability that one mutation call adds a new connection.
    pub add_connection_chance: f32,
    /// Per-weight and per-bias probability of perturbation.
    pub perturbation_chance: f32,
    /// Perturbation noise is drawn uniformly from
    /// `[-perturbation_magnitude, perturbation_magnitude]`.
    pub perturbation_magnitude: f32,
    /// Per-node probability of redrawing the activation function.
    pub change_function_chance: f32,
    /// Roulette weights for activation-function selection, index-aligned with
    /// the shared function table.
    pub function_weights: Vec<f32>,
    /// Whether the add-connection operator may create self-loops. A self-loop
    /// reads the node's own previous-sweep value through a recurrent register.
    pub allow_self_connections: bool,
}

impl Default for GenotypeConfig {
    fn default() -> Self {
        Self {
            weight_range: 1.0,
            add_node_chance: 0.1,
            add_connection_chance: 0.2,
            perturbation_chance: 0.2,
            perturbation_magnitude: 0.75,
            change_function_chance: 0.05,
            function_weights: vec![1.0; 8],
            allow_self_connections: true,
        }
    }
}

/// Weighting for the structural distance measure used by speciation-aware
/// parent selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceConfig {
    /// Factor on the mean absolute weight difference over ID-matched edges.
    pub weight_factor: f32,
    /// Factor per edge present in only one of the compared nodes.
    pub disjoint_factor: f32,
    /// Flat penalty per compared node pair with differing function indices.
    pub function_factor: f32,
    /// Decay applied per recursion hop into matched edge sources.
    pub importance_decay: f32,
    /// Maximum recursion depth; negative means unbounded (cycle-safe).
    pub search_depth: i32,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            weight_factor: 0.4,
            disjoint_factor: 1.0,
            function_factor: 3.0,
            importance_decay: 0.75,
            search_depth: 3,
        }
    }
}

/// Removal policy for [`Genotype::set_num_inputs_feed_forward`] and
/// [`Genotype::set_num_outputs_feed_forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveMethod {
    /// Remove uniformly chosen slots.
    Random,
    /// Remove from the end.
    Last,
}

/// Error produced when parsing the persisted textual genotype format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input ended before the declared counts were satisfied.
    UnexpectedEnd,
    /// A token could not be parsed as the expected number.
    InvalidToken(String),
    /// A connection references a node ID absent from the node set.
    DanglingReference { node: u64, source: u64 },
    /// An input or output slot references a node ID absent from the node set.
    UnknownEndpoint(u64),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnexpectedEnd => write!(f, "unexpected end of genotype text"),
            ParseError::InvalidToken(token) => write!(f, "invalid token {token:?}"),
            ParseError::DanglingReference { node, source } => write!(
                f,
                "node {node} references source {source} which is not in the node set"
            ),
            ParseError::UnknownEndpoint(id) => {
                write!(f, "input/output slot references unknown node {id}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// The evolvable graph representation of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    /// Node arena keyed by stable ID. Ordered iteration keeps phenotype
    /// construction and code emission deterministic.
    pub nodes: BTreeMap<NodeId, Node>,
    /// Input slot order: position in this list is the input index.
    pub input_ids: Vec<NodeId>,
    /// Output slot order: position in this list is the output index.
    pub output_ids: Vec<NodeId>,
    /// Next fresh node ID. Monotone per lineage; never reused.
    pub next_node_id: u64,
}

fn random_weight<R: Rng>(range: f32, rng: &mut R) -> f32 {
    rng.random::<f32>() * 2.0 * range - range
}

impl Genotype {
    /// Create a fully connected feed-forward genotype: every output node
    /// consumes every input node, no hidden nodes.
    ///
    /// Inputs take IDs `0..num_inputs`, outputs the following IDs, matching
    /// their slot order. Every node gets a random bias and a roulette-drawn
    /// activation function.
    #[must_use]
    pub fn random_feed_forward<R: Rng>(
        num_inputs: usize,
        num_outputs: usize,
        config: &GenotypeConfig,
        rng: &mut R,
    ) -> Self {
        let mut nodes = BTreeMap::new();
        let num_nodes = num_inputs + num_outputs;

        for id in 0..num_nodes as u64 {
            nodes.insert(
                NodeId(id),
                Node {
                    bias: random_weight(config.weight_range, rng),
                    function: roulette(&config.function_weights, rng),
                    connections: BTreeMap::new(),
                },
            );
        }

        for out in num_inputs..num_nodes {
            let node = nodes.get_mut(&NodeId(out as u64)).unwrap();
            for input in 0..num_inputs {
                node.connections
                    .insert(NodeId(input as u64), random_weight(config.weight_range, rng));
            }
        }

        Self {
            nodes,
            input_ids: (0..num_inputs as u64).map(NodeId).collect(),
            output_ids: (num_inputs as u64..num_nodes as u64).map(NodeId).collect(),
            next_node_id: num_nodes as u64,
        }
    }

    /// Number of input slots.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.input_ids.len()
    }

    /// Number of output slots.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.output_ids.len()
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    /// Add a connection from `source` into `target` with the given weight.
    ///
    /// Returns `false` without modifying the graph if either node is missing,
    /// `target` is an input slot, or the connection already exists.
    pub fn add_connection(&mut self, target: NodeId, source: NodeId, weight: f32) -> bool {
        if !self.nodes.contains_key(&source) || self.input_ids.contains(&target) {
            return false;
        }

        let Some(node) = self.nodes.get_mut(&target) else {
            return false;
        };

        if node.connections.contains_key(&source) {
            return false;
        }

        node.connections.insert(source, weight);
        true
    }

    /// Split the edge `source -> target` with a fresh node.
    ///
    /// The edge is removed; the new node consumes `source` with a new random
    /// weight and feeds `target` with another new random weight, so every
    /// path through the old edge survives. Returns the new node's ID, or
    /// `None` if the edge does not exist.
    pub fn split_connection<R: Rng>(
        &mut self,
        target: NodeId,
        source: NodeId,
        config: &GenotypeConfig,
        rng: &mut R,
    ) -> Option<NodeId> {
        self.nodes.get_mut(&target)?.connections.remove(&source)?;

        let id = self.fresh_id();

        let mut connections = BTreeMap::new();
        connections.insert(source, random_weight(config.weight_range, rng));

        self.nodes.insert(
            id,
            Node {
                bias: random_weight(config.weight_range, rng),
                function: roulette(&config.function_weights, rng),
                connections,
            },
        );

        self.nodes
            .get_mut(&target)
            .unwrap()
            .connections
            .insert(id, random_weight(config.weight_range, rng));

        Some(id)
    }

    /// Apply one round of structural and parametric mutation in place.
    ///
    /// Every weight and bias is perturbed independently with
    /// `perturbation_chance`; every node redraws its function with
    /// `change_function_chance`; then the add-node and add-connection
    /// operators each fire at most once, gated by their chances. Operators
    /// that find no eligible site are silent no-ops.
    pub fn mutate<R: Rng>(&mut self, config: &GenotypeConfig, rng: &mut R) {
        for node in self.nodes.values_mut() {
            for weight in node.connections.values_mut() {
                if rng.random::<f32>() < config.perturbation_chance {
                    *weight += random_weight(config.perturbation_magnitude, rng);
                }
            }

            if rng.random::<f32>() < config.perturbation_chance {
                node.bias += random_weight(config.perturbation_magnitude, rng);
            }

            if rng.random::<f32>() < config.change_function_chance {
                node.function = roulette(&config.function_weights, rng);
            }
        }

        if rng.random::<f32>() < config.add_node_chance {
            self.mutate_add_node(config, rng);
        }

        if rng.random::<f32>() < config.add_connection_chance {
            self.mutate_add_connection(config, rng);
        }
    }

    fn mutate_add_node<R: Rng>(&mut self, config: &GenotypeConfig, rng: &mut R) {
        let candidates: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| !node.connections.is_empty())
            .map(|(&id, _)| id)
            .collect();

        if candidates.is_empty() {
            return;
        }

        let target = candidates[rng.random_range(0..candidates.len())];

        let sources: Vec<NodeId> = self.nodes[&target].connections.keys().copied().collect();
        let source = sources[rng.random_range(0..sources.len())];

        self.split_connection(target, source, config, rng);
    }

    fn mutate_add_connection<R: Rng>(&mut self, config: &GenotypeConfig, rng: &mut R) {
        let input_set: HashSet<NodeId> = self.input_ids.iter().copied().collect();

        // A node is saturated once it consumes every eligible source
        let capacity = if config.allow_self_connections {
            self.nodes.len()
        } else {
            self.nodes.len().saturating_sub(1)
        };

        let targets: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, node)| !input_set.contains(id) && node.connections.len() < capacity)
            .map(|(&id, _)| id)
            .collect();

        if targets.is_empty() {
            return;
        }

        let target = targets[rng.random_range(0..targets.len())];

        let existing = &self.nodes[&target].connections;
        let sources: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|&&id| {
                !existing.contains_key(&id) && (config.allow_self_connections || id != target)
            })
            .copied()
            .collect();

        if sources.is_empty() {
            return;
        }

        let source = sources[rng.random_range(0..sources.len())];
        let weight = random_weight(config.weight_range, rng);

        self.nodes
            .get_mut(&target)
            .unwrap()
            .connections
            .insert(source, weight);
    }

    /// Produce a child by merging two parents node-by-node on stable IDs.
    ///
    /// Matched nodes merge bias and matched edge weights (averaged with
    /// `average_chance`, otherwise taken from a uniformly chosen parent);
    /// disjoint edges and unmatched nodes are copied whole. Edges whose
    /// source did not make it into the child are pruned, and the child's
    /// `next_node_id` is the max of both parents so future IDs never collide
    /// with either lineage.
    #[must_use]
    pub fn from_parents<R: Rng>(
        parent_a: &Genotype,
        parent_b: &Genotype,
        average_chance: f32,
        rng: &mut R,
    ) -> Self {
        let merge = |a: f32, b: f32, rng: &mut R| -> f32 {
            if rng.random::<f32>() < average_chance {
                (a + b) * 0.5
            } else if rng.random::<f32>() < 0.5 {
                a
            } else {
                b
            }
        };

        let mut nodes = BTreeMap::new();

        for (&id, node_a) in &parent_a.nodes {
            let child = match parent_b.nodes.get(&id) {
                Some(node_b) => {
                    let bias = merge(node_a.bias, node_b.bias, rng);
                    let function = if rng.random::<f32>() < 0.5 {
                        node_a.function
                    } else {
                        node_b.function
                    };

                    let mut connections = BTreeMap::new();

                    for (&source, &weight_a) in &node_a.connections {
                        let weight = match node_b.connections.get(&source) {
                            Some(&weight_b) => merge(weight_a, weight_b, rng),
                            None => weight_a,
                        };
                        connections.insert(source, weight);
                    }

                    for (&source, &weight_b) in &node_b.connections {
                        connections.entry(source).or_insert(weight_b);
                    }

                    Node {
                        bias,
                        function,
                        connections,
                    }
                }
                None => node_a.clone(),
            };

            nodes.insert(id, child);
        }

        for (&id, node_b) in &parent_b.nodes {
            if !nodes.contains_key(&id) {
                nodes.insert(id, node_b.clone());
            }
        }

        let mut child = Self {
            nodes,
            input_ids: parent_a.input_ids.clone(),
            output_ids: parent_a.output_ids.clone(),
            next_node_id: parent_a.next_node_id.max(parent_b.next_node_id),
        };

        child.prune_dangling();
        child
    }

    /// Remove every edge whose source ID is absent from the node set.
    pub fn prune_dangling(&mut self) {
        let ids: BTreeSet<NodeId> = self.nodes.keys().copied().collect();

        for node in self.nodes.values_mut() {
            node.connections.retain(|source, _| ids.contains(source));
        }
    }

    /// Structural distance to another genotype.
    ///
    /// Walks index-aligned output pairs backward through ID-matched edges,
    /// summing disjoint-edge counts, mean absolute weight differences and a
    /// flat penalty per node pair with differing functions, with
    /// disagreement deeper in the graph attenuated by `importance_decay`.
    /// Symmetric, and zero against an exact structural copy.
    #[must_use]
    pub fn distance(&self, other: &Genotype, config: &DistanceConfig) -> f32 {
        let mut total = 0.0;

        for (&id_a, &id_b) in self.output_ids.iter().zip(&other.output_ids) {
            let mut visited = HashSet::new();
            total += node_distance(
                self,
                other,
                id_a,
                id_b,
                config.search_depth,
                config,
                &mut visited,
            );
        }

        total
    }

    /// IDs of every node reachable backward from an output slot.
    #[must_use]
    pub fn reachable_from_outputs(&self) -> BTreeSet<NodeId> {
        let mut reached = BTreeSet::new();
        let mut open: Vec<NodeId> = self.output_ids.clone();

        while let Some(id) = open.pop() {
            if !reached.insert(id) {
                continue;
            }

            if let Some(node) = self.nodes.get(&id) {
                open.extend(node.connections.keys().copied());
            }
        }

        reached
    }

    /// Append an input slot: a fresh node consumed by every output node.
    pub fn add_input_feed_forward<R: Rng>(&mut self, config: &GenotypeConfig, rng: &mut R) {
        let id = self.fresh_id();

        self.nodes.insert(
            id,
            Node {
                bias: random_weight(config.weight_range, rng),
                function: roulette(&config.function_weights, rng),
                connections: BTreeMap::new(),
            },
        );

        for output in self.output_ids.clone() {
            if let Some(node) = self.nodes.get_mut(&output) {
                node.connections
                    .insert(id, random_weight(config.weight_range, rng));
            }
        }

        self.input_ids.push(id);
    }

    /// Append an output slot: a fresh node consuming every input node.
    pub fn add_output_feed_forward<R: Rng>(&mut self, config: &GenotypeConfig, rng: &mut R) {
        let id = self.fresh_id();

        let mut connections = BTreeMap::new();
        for &input in &self.input_ids {
            connections.insert(input, random_weight(config.weight_range, rng));
        }

        self.nodes.insert(
            id,
            Node {
                bias: random_weight(config.weight_range, rng),
                function: roulette(&config.function_weights, rng),
                connections,
            },
        );

        self.output_ids.push(id);
    }

    /// Retire an input slot. The node stays in the graph; it simply no longer
    /// receives an external value.
    pub fn remove_input(&mut self, index: usize) {
        self.input_ids.remove(index);
    }

    /// Retire an output slot. The node stays in the graph.
    pub fn remove_output(&mut self, index: usize) {
        self.output_ids.remove(index);
    }

    /// Grow or shrink the input arity to exactly `num_inputs`.
    pub fn set_num_inputs_feed_forward<R: Rng>(
        &mut self,
        num_inputs: usize,
        config: &GenotypeConfig,
        rng: &mut R,
        removal: RemoveMethod,
    ) {
        while self.num_inputs() > num_inputs {
            let index = match removal {
                RemoveMethod::Random => rng.random_range(0..self.num_inputs()),
                RemoveMethod::Last => self.num_inputs() - 1,
            };
            self.remove_input(index);
        }

        while self.num_inputs() < num_inputs {
            self.add_input_feed_forward(config, rng);
        }
    }

    /// Grow or shrink the output arity to exactly `num_outputs`.
    pub fn set_num_outputs_feed_forward<R: Rng>(
        &mut self,
        num_outputs: usize,
        config: &GenotypeConfig,
        rng: &mut R,
        removal: RemoveMethod,
    ) {
        while self.num_outputs() > num_outputs {
            let index = match removal {
                RemoveMethod::Random => rng.random_range(0..self.num_outputs()),
                RemoveMethod::Last => self.num_outputs() - 1,
            };
            self.remove_output(index);
        }

        while self.num_outputs() < num_outputs {
            self.add_output_feed_forward(config, rng);
        }
    }

    /// Serialize to the persisted whitespace-delimited text format.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.nodes.len());

        for (id, node) in &self.nodes {
            let _ = write!(
                out,
                "{} {} {} {}",
                id.0,
                node.bias,
                node.function,
                node.connections.len()
            );

            for (source, weight) in &node.connections {
                let _ = write!(out, " {} {}", source.0, weight);
            }

            out.push('\n');
        }

        let _ = writeln!(out, "{}", self.input_ids.len());
        let _ = writeln!(
            out,
            "{}",
            join_ids(&self.input_ids)
        );

        let _ = writeln!(out, "{}", self.output_ids.len());
        let _ = writeln!(
            out,
            "{}",
            join_ids(&self.output_ids)
        );

        out
    }

    /// Parse the persisted text format produced by [`Genotype::to_text`].
    ///
    /// Builds a fresh genotype or fails without side effects; `next_node_id`
    /// is recovered as one past the highest node ID.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let mut tokens = text.split_whitespace();

        let num_nodes: usize = next_number(&mut tokens)?;

        let mut nodes = BTreeMap::new();
        let mut next_node_id = 0u64;

        for _ in 0..num_nodes {
            let id: u64 = next_number(&mut tokens)?;
            let bias: f32 = next_number(&mut tokens)?;
            let function: usize = next_number(&mut tokens)?;
            let edge_count: usize = next_number(&mut tokens)?;

            let mut connections = BTreeMap::new();
            for _ in 0..edge_count {
                let source: u64 = next_number(&mut tokens)?;
                let weight: f32 = next_number(&mut tokens)?;
                connections.insert(NodeId(source), weight);
            }

            nodes.insert(
                NodeId(id),
                Node {
                    bias,
                    function,
                    connections,
                },
            );

            next_node_id = next_node_id.max(id + 1);
        }

        let num_inputs: usize = next_number(&mut tokens)?;
        let mut input_ids = Vec::with_capacity(num_inputs);
        for _ in 0..num_inputs {
            input_ids.push(NodeId(next_number(&mut tokens)?));
        }

        let num_outputs: usize = next_number(&mut tokens)?;
        let mut output_ids = Vec::with_capacity(num_outputs);
        for _ in 0..num_outputs {
            output_ids.push(NodeId(next_number(&mut tokens)?));
        }

        for (id, node) in &nodes {
            for source in node.connections.keys() {
                if !nodes.contains_key(source) {
                    return Err(ParseError::DanglingReference {
                        node: id.0,
                        source: source.0,
                    });
                }
            }
        }

        for id in input_ids.iter().chain(&output_ids) {
            if !nodes.contains_key(id) {
                return Err(ParseError::UnknownEndpoint(id.0));
            }
        }

        Ok(Self {
            nodes,
            input_ids,
            output_ids,
            next_node_id,
        })
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn next_number<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<T, ParseError> {
    let token = tokens.next().ok_or(ParseError::UnexpectedEnd)?;
    token
        .parse()
        .map_err(|_| ParseError::InvalidToken(token.to_string()))
}

fn node_distance(
    a: &Genotype,
    b: &Genotype,
    id_a: NodeId,
    id_b: NodeId,
    depth: i32,
    config: &DistanceConfig,
    visited: &mut HashSet<(NodeId, NodeId)>,
) -> f32 {
    if !visited.insert((id_a, id_b)) {
        return 0.0;
    }

    let (Some(node_a), Some(node_b)) = (a.nodes.get(&id_a), b.nodes.get(&id_b)) else {
        return 0.0;
    };

    let mut disjoint = 0usize;
    let mut matched = 0usize;
    let mut weight_difference = 0.0;
    let mut connected_difference = 0.0;

    for (&source, &weight_a) in &node_a.connections {
        match node_b.connections.get(&source) {
            Some(&weight_b) => {
                matched += 1;
                weight_difference += (weight_a - weight_b).abs();

                if depth != 0 {
                    connected_difference +=
                        node_distance(a, b, source, source, depth - 1, config, visited);
                }
            }
            None => disjoint += 1,
        }
    }

    for source in node_b.connections.keys() {
        if !node_a.connections.contains_key(source) {
            disjoint += 1;
        }
    }

    let mean_weight_difference = if matched > 0 {
        weight_difference / matched as f32
    } else {
        0.0
    };

    let function_difference = if node_a.function != node_b.function {
        config.function_factor
    } else {
        0.0
    };

    config.weight_factor * mean_weight_difference
        + config.disjoint_factor * disjoint as f32
        + config.importance_decay * connected_difference
        + function_difference
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_random_feed_forward_layout() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let genotype = Genotype::random_feed_forward(3, 2, &config, &mut rng);

        assert_eq!(genotype.num_inputs(), 3);
        assert_eq!(genotype.num_outputs(), 2);
        assert_eq!(genotype.nodes.len(), 5);
        assert_eq!(genotype.next_node_id, 5);

        for &output in &genotype.output_ids {
            assert_eq!(genotype.nodes[&output].connections.len(), 3);
        }

        for &input in &genotype.input_ids {
            assert!(genotype.nodes[&input].connections.is_empty());
        }
    }

    #[test]
    fn test_outputs_reachable_from_inputs() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let genotype = Genotype::random_feed_forward(2, 2, &config, &mut rng);

        let reached = genotype.reachable_from_outputs();
        for &input in &genotype.input_ids {
            assert!(reached.contains(&input));
        }
    }

    #[test]
    fn test_split_connection_preserves_path() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(1, 1, &config, &mut rng);

        let target = genotype.output_ids[0];
        let source = genotype.input_ids[0];

        let before = genotype.reachable_from_outputs();
        let new_id = genotype
            .split_connection(target, source, &config, &mut rng)
            .unwrap();

        assert!(!genotype.nodes[&target].connections.contains_key(&source));
        assert!(genotype.nodes[&target].connections.contains_key(&new_id));
        assert!(genotype.nodes[&new_id].connections.contains_key(&source));

        let after = genotype.reachable_from_outputs();
        for id in before {
            assert!(after.contains(&id), "split disconnected {id:?}");
        }
    }

    #[test]
    fn test_split_missing_connection_is_none() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(1, 1, &config, &mut rng);

        let target = genotype.output_ids[0];
        assert!(genotype
            .split_connection(target, NodeId(99), &config, &mut rng)
            .is_none());
    }

    #[test]
    fn test_add_connection_rejects_input_target_and_duplicates() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(2, 1, &config, &mut rng);

        let input = genotype.input_ids[0];
        let output = genotype.output_ids[0];

        assert!(!genotype.add_connection(input, output, 1.0));
        assert!(!genotype.add_connection(output, genotype.input_ids[1], 1.0));
        assert!(genotype.add_connection(output, output, 1.0));
    }

    #[test]
    fn test_mutate_add_connection_respects_completeness() {
        let config = GenotypeConfig {
            add_connection_chance: 1.0,
            add_node_chance: 0.0,
            perturbation_chance: 0.0,
            change_function_chance: 0.0,
            ..GenotypeConfig::default()
        };
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(1, 1, &config, &mut rng);

        // 1 input, 1 output: the only missing edges into the output are the
        // self-loop and the output itself as a source. Saturate them.
        for _ in 0..50 {
            genotype.mutate(&config, &mut rng);
        }

        let output = genotype.output_ids[0];
        assert!(genotype.nodes[&output].connections.len() <= genotype.nodes.len());

        // Further calls are no-ops once every non-input node is saturated
        let snapshot = genotype.clone();
        let saturated = genotype
            .nodes
            .iter()
            .filter(|(id, _)| !genotype.input_ids.contains(id))
            .all(|(_, node)| node.connections.len() >= genotype.nodes.len());
        if saturated {
            genotype.mutate(&config, &mut rng);
            assert_eq!(snapshot.nodes.len(), genotype.nodes.len());
        }
    }

    #[test]
    fn test_no_self_loops_when_disabled() {
        let config = GenotypeConfig {
            add_connection_chance: 1.0,
            add_node_chance: 0.0,
            perturbation_chance: 0.0,
            change_function_chance: 0.0,
            allow_self_connections: false,
            ..GenotypeConfig::default()
        };
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(2, 2, &config, &mut rng);

        for _ in 0..100 {
            genotype.mutate(&config, &mut rng);
        }

        for (id, node) in &genotype.nodes {
            assert!(
                !node.connections.contains_key(id),
                "self-loop on {id:?} with self connections disabled"
            );
        }
    }

    #[test]
    fn test_mutation_keeps_reachability() {
        let config = GenotypeConfig {
            add_node_chance: 0.5,
            add_connection_chance: 0.5,
            ..GenotypeConfig::default()
        };
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(3, 2, &config, &mut rng);

        for _ in 0..200 {
            let before = genotype.reachable_from_outputs();
            genotype.mutate(&config, &mut rng);
            let after = genotype.reachable_from_outputs();

            for id in before {
                assert!(after.contains(&id), "mutation disconnected {id:?}");
            }
        }
    }

    #[test]
    fn test_crossover_no_dangling_references() {
        let config = GenotypeConfig {
            add_node_chance: 0.8,
            add_connection_chance: 0.8,
            ..GenotypeConfig::default()
        };
        let mut rng = test_rng();

        let mut parent_a = Genotype::random_feed_forward(2, 1, &config, &mut rng);
        let mut parent_b = parent_a.clone();

        for _ in 0..30 {
            parent_a.mutate(&config, &mut rng);
            parent_b.mutate(&config, &mut rng);
        }

        let child = Genotype::from_parents(&parent_a, &parent_b, 0.5, &mut rng);

        for (id, node) in &child.nodes {
            for source in node.connections.keys() {
                assert!(
                    child.nodes.contains_key(source),
                    "child node {id:?} references missing {source:?}"
                );
            }
        }

        assert_eq!(
            child.next_node_id,
            parent_a.next_node_id.max(parent_b.next_node_id)
        );
    }

    #[test]
    fn test_crossover_of_identical_parents_preserves_structure() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let parent = Genotype::random_feed_forward(2, 2, &config, &mut rng);

        let child = Genotype::from_parents(&parent, &parent, 1.0, &mut rng);

        assert_eq!(child.nodes.len(), parent.nodes.len());
        for (id, node) in &parent.nodes {
            let child_node = &child.nodes[id];
            assert_eq!(child_node.function, node.function);
            assert_eq!(
                child_node.connections.keys().collect::<Vec<_>>(),
                node.connections.keys().collect::<Vec<_>>()
            );
            // averaging identical values is the identity
            assert!((child_node.bias - node.bias).abs() < 1e-6);
        }
    }

    #[test]
    fn test_distance_symmetric_and_zero_on_copy() {
        let config = GenotypeConfig {
            add_node_chance: 0.5,
            add_connection_chance: 0.5,
            ..GenotypeConfig::default()
        };
        let distance_config = DistanceConfig::default();
        let mut rng = test_rng();

        let mut a = Genotype::random_feed_forward(2, 2, &config, &mut rng);
        let mut b = a.clone();

        assert_eq!(a.distance(&b, &distance_config), 0.0);

        for _ in 0..20 {
            a.mutate(&config, &mut rng);
            b.mutate(&config, &mut rng);
        }

        let ab = a.distance(&b, &distance_config);
        let ba = b.distance(&a, &distance_config);

        assert!(ab >= 0.0);
        assert!((ab - ba).abs() < 1e-4, "distance not symmetric: {ab} vs {ba}");
        assert_eq!(a.distance(&a.clone(), &distance_config), 0.0);
    }

    #[test]
    fn test_distance_unbounded_depth_terminates_on_cycles() {
        let config = GenotypeConfig::default();
        let distance_config = DistanceConfig {
            search_depth: -1,
            ..DistanceConfig::default()
        };
        let mut rng = test_rng();

        let mut a = Genotype::random_feed_forward(1, 1, &config, &mut rng);
        let output = a.output_ids[0];
        a.add_connection(output, output, 0.5);

        let mut b = a.clone();
        b.nodes.get_mut(&output).unwrap().bias += 1.0;

        // Must return despite the self-cycle
        let d = a.distance(&b, &distance_config);
        assert!(d.is_finite());
    }

    #[test]
    fn test_arity_editing_feed_forward() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let mut genotype = Genotype::random_feed_forward(2, 1, &config, &mut rng);

        genotype.set_num_inputs_feed_forward(4, &config, &mut rng, RemoveMethod::Last);
        assert_eq!(genotype.num_inputs(), 4);

        genotype.set_num_outputs_feed_forward(3, &config, &mut rng, RemoveMethod::Last);
        assert_eq!(genotype.num_outputs(), 3);

        // New outputs consume every input slot
        let last_output = *genotype.output_ids.last().unwrap();
        for &input in &genotype.input_ids {
            assert!(genotype.nodes[&last_output].connections.contains_key(&input));
        }

        genotype.set_num_inputs_feed_forward(1, &config, &mut rng, RemoveMethod::Last);
        assert_eq!(genotype.num_inputs(), 1);
    }

    #[test]
    fn test_text_round_trip() {
        let config = GenotypeConfig {
            add_node_chance: 0.6,
            add_connection_chance: 0.6,
            ..GenotypeConfig::default()
        };
        let mut rng = test_rng();

        let mut genotype = Genotype::random_feed_forward(3, 2, &config, &mut rng);
        for _ in 0..25 {
            genotype.mutate(&config, &mut rng);
        }
        // Ensure at least one cycle is present
        let output = genotype.output_ids[0];
        genotype.add_connection(output, output, -0.25);

        let text = genotype.to_text();
        let restored = Genotype::from_text(&text).unwrap();

        assert_eq!(restored.nodes, genotype.nodes);
        assert_eq!(restored.input_ids, genotype.input_ids);
        assert_eq!(restored.output_ids, genotype.output_ids);
    }

    #[test]
    fn test_text_round_trip_crossover_child() {
        let config = GenotypeConfig {
            add_node_chance: 0.8,
            add_connection_chance: 0.8,
            ..GenotypeConfig::default()
        };
        let mut rng = test_rng();

        let mut parent_a = Genotype::random_feed_forward(2, 1, &config, &mut rng);
        let mut parent_b = parent_a.clone();
        for _ in 0..20 {
            parent_a.mutate(&config, &mut rng);
            parent_b.mutate(&config, &mut rng);
        }

        let child = Genotype::from_parents(&parent_a, &parent_b, 0.5, &mut rng);
        let restored = Genotype::from_text(&child.to_text()).unwrap();

        assert_eq!(restored.nodes, child.nodes);
    }

    #[test]
    fn test_from_text_truncated() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let genotype = Genotype::random_feed_forward(2, 1, &config, &mut rng);

        let text = genotype.to_text();
        let truncated = &text[..text.len() / 2];

        assert!(matches!(
            Genotype::from_text(truncated),
            Err(ParseError::UnexpectedEnd) | Err(ParseError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_from_text_malformed_token() {
        let err = Genotype::from_text("not-a-number").unwrap_err();
        assert!(matches!(err, ParseError::InvalidToken(_)));
    }

    #[test]
    fn test_from_text_dangling_reference() {
        // One node consuming a source that does not exist
        let text = "1\n5 0.5 0 1 9 1.0\n0\n\n1\n5\n";
        let err = Genotype::from_text(text).unwrap_err();
        assert_eq!(err, ParseError::DanglingReference { node: 5, source: 9 });
    }

    #[test]
    fn test_serde_round_trip() {
        let config = GenotypeConfig::default();
        let mut rng = test_rng();
        let genotype = Genotype::random_feed_forward(2, 2, &config, &mut rng);

        let json = serde_json::to_string(&genotype).expect("serialize");
        let restored: Genotype = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored, genotype);
    }
}
