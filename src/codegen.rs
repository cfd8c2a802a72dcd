//! Lowering of a phenotype into kernel source text.
//!
//! [`rule_source`] is a pure function from a [`Phenotype`] (plus the
//! kernel-side activation-function names) to a self-contained C-style function
//! definition, intended for textual splicing by an external kernel assembler.
//! The signature is fully determined by the phenotype's counts: one scalar
//! parameter per input, one pointer parameter per output, one pointer
//! parameter per recurrent register, in that order.
//!
//! Fan-out nodes are cached: any node whose value feeds two or more
//! intermediate fetches is assigned to a named local exactly once and
//! referenced by name thereafter, so a shared subexpression is never expanded
//! twice. Recurrent sources are cached as well, which keeps every register
//! read ahead of every register write. Everything else inlines recursively,
//! terminating at input parameters, register reads, or already-cached locals.
//! Register writes are emitted after all output writes, matching the
//! interpreter's sweep semantics.

use std::fmt::Write as _;

use crate::phenotype::{Fetch, Phenotype};

/// Generate kernel source for `phenotype` as a function named `rule_name`.
///
/// `function_names` must be index-aligned with the node function indices
/// (usually [`FunctionTable::names`](crate::function::FunctionTable::names)).
///
/// # Panics
///
/// Panics on a malformed phenotype (an unassigned fetch index or a recurrent
/// fetch without a register slot); a correctly constructed phenotype never
/// triggers this.
#[must_use]
pub fn rule_source(phenotype: &Phenotype, rule_name: &str, function_names: &[&str]) -> String {
    let nodes = phenotype.nodes();

    // Non-recurrent fan-out per node: how many intermediate fetches consume it
    let mut fan_out = vec![0usize; nodes.len()];
    for node in nodes {
        for connection in &node.connections {
            if let Fetch::Intermediate(source) = connection.source {
                fan_out[source] += 1;
            }
        }
    }

    let mut cached: Vec<bool> = fan_out.iter().map(|&count| count >= 2).collect();

    // Register writes come last and may clobber registers that other nodes'
    // expressions still read, so every recurrent source is pinned to a local
    // while all registers still hold their previous-sweep values
    for &index in phenotype.recurrent_node_indices() {
        cached[index] = true;
    }

    let mut emitted = vec![false; nodes.len()];

    let mut statements: Vec<String> = Vec::new();

    // Node order is dependency order, so a cache assignment always precedes
    // every reference to it
    for index in 0..nodes.len() {
        if cached[index] {
            let expression = node_expression(phenotype, function_names, &cached, &emitted, index);
            statements.push(format!("float intermediate{index} = {expression};"));
            emitted[index] = true;
        }
    }

    let first_output = nodes.len() - phenotype.num_outputs();
    for slot in 0..phenotype.num_outputs() {
        let value = node_reference(
            phenotype,
            function_names,
            &cached,
            &emitted,
            first_output + slot,
        );
        statements.push(format!("*o{slot} = {value};"));
    }

    for (slot, &index) in phenotype.recurrent_node_indices().iter().enumerate() {
        let value = node_reference(phenotype, function_names, &cached, &emitted, index);
        statements.push(format!("*r{slot} = {value};"));
    }

    let mut parameters: Vec<String> = Vec::new();
    for slot in 0..phenotype.num_inputs() {
        parameters.push(format!("float i{slot}"));
    }
    for slot in 0..phenotype.num_outputs() {
        parameters.push(format!("float* o{slot}"));
    }
    for slot in 0..phenotype.recurrent_len() {
        parameters.push(format!("float* r{slot}"));
    }

    let mut source = String::new();
    let _ = write!(source, "void {rule_name}({})", parameters.join(", "));
    source.push_str(" {\n");
    for statement in &statements {
        let _ = writeln!(source, "    {statement}");
    }
    source.push_str("}\n");

    source
}

/// A node's value at a use site: its cache name if cached, otherwise its
/// fully inlined expression.
fn node_reference(
    phenotype: &Phenotype,
    function_names: &[&str],
    cached: &[bool],
    emitted: &[bool],
    index: usize,
) -> String {
    if cached[index] {
        assert!(emitted[index], "cache referenced before assignment");
        format!("intermediate{index}")
    } else {
        node_expression(phenotype, function_names, cached, emitted, index)
    }
}

/// The full activation-call expression for one node.
fn node_expression(
    phenotype: &Phenotype,
    function_names: &[&str],
    cached: &[bool],
    emitted: &[bool],
    index: usize,
) -> String {
    let node = &phenotype.nodes()[index];

    let mut terms: Vec<String> = node
        .connections
        .iter()
        .map(|connection| {
            let source = match connection.source {
                Fetch::Input(slot) => format!("i{slot}"),
                Fetch::Recurrent(source) => {
                    let slot = phenotype
                        .recurrent_node_indices()
                        .iter()
                        .position(|&i| i == source)
                        .expect("recurrent fetch without a register slot");
                    format!("(*r{slot})")
                }
                Fetch::Intermediate(source) => {
                    node_reference(phenotype, function_names, cached, emitted, source)
                }
            };
            format!("{} * {}", format_float(connection.weight), source)
        })
        .collect();

    terms.push(format_float(node.bias));

    format!("{}({})", function_names[node.function], terms.join(" + "))
}

/// Shortest round-trip formatting with a forced decimal point, so emitted
/// literals stay floating-point in C-family kernel dialects.
fn format_float(value: f32) -> String {
    let mut text = format!("{value}");
    if value.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text
}
