//! # Rulenet
//!
//! An engine for evolving small, possibly cyclic computation graphs ("rules")
//! and compiling them to kernel source text for massively parallel dispatch.
//!
//! ## Features
//!
//! - **Stable-ID Graph Genotypes**: nodes live in an arena keyed by
//!   lineage-wide integer IDs, so two independently evolved genotypes cross
//!   over by node identity with no dangling references possible
//! - **Recurrent Phenotypes**: cycles are first-class; lowering classifies
//!   every edge as input, intermediate or recurrent, and recurrent state is
//!   carried between sweeps in explicit registers
//! - **Kernel Code Generation**: a phenotype lowers to a self-contained
//!   C-style function with common-subexpression caching, ready for textual
//!   splicing into a larger generated kernel
//! - **Speciation-Aware Evolution**: fitness-proportional selection with a
//!   structural-distance mating preference, elitism, and in-place mutation
//!
//! ## Quick Start
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rulenet::{rule_source, FunctionTable, Genotype, GenotypeConfig, Phenotype};
//!
//! let config = GenotypeConfig::default();
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//!
//! // A fresh rule: two inputs, one output, fully connected
//! let genotype = Genotype::random_feed_forward(2, 1, &config, &mut rng);
//!
//! // Run it on the host...
//! let table = FunctionTable::standard();
//! let mut phenotype = Phenotype::from_genotype(&genotype);
//! let mut outputs = [0.0];
//! phenotype.execute(&[0.5, -0.5], &mut outputs, &mut [], &table);
//!
//! // ...or lower it to kernel source for the device
//! let kernel = rule_source(&phenotype, "cellRule", &table.names());
//! assert!(kernel.starts_with("void cellRule(float i0, float i1, float* o0)"));
//! ```
//!
//! ## Evolving a Population
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rulenet::{Evolver, EvolverSettings, FunctionTable, Phenotype};
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(7);
//! let settings = EvolverSettings {
//!     population_size: 20,
//!     num_elites: 3,
//!     ..EvolverSettings::default()
//! };
//!
//! let table = FunctionTable::standard();
//! let mut evolver = Evolver::new(1, 1, settings, &mut rng);
//!
//! for _ in 0..5 {
//!     // Fitness: match f(x) = x at a single probe point
//!     evolver.evaluate_with(|genotype| {
//!         let mut phenotype = Phenotype::from_genotype(genotype);
//!         let mut outputs = [0.0];
//!         let mut registers = vec![0.0; phenotype.recurrent_len()];
//!         phenotype.execute(&[0.5], &mut outputs, &mut registers, &table);
//!         -(outputs[0] - 0.5).abs()
//!     });
//!     evolver.epoch(&mut rng);
//! }
//! ```
//!
//! ## Architecture
//!
//! A [`Genotype`] is the evolvable form: a cyclic graph under structural
//! mutation and ID-matched crossover. A [`Phenotype`] is its minimal
//! executable snapshot, rebuilt whenever the genotype changes, and is what
//! both the host interpreter and [`rule_source`] consume. The [`Evolver`]
//! drives generations; fitness evaluation belongs to the caller, which
//! typically splices each emitted rule into a device kernel, runs the
//! surrounding simulation, and scores the result.
//!
//! Recurrent state never lives inside the core: every execution context owns
//! one scalar register per entry of
//! [`Phenotype::recurrent_node_indices`] — an array on the host, a slice of
//! the per-cell buffer on the device.

pub mod codegen;
pub mod evolver;
pub mod function;
pub mod genotype;
pub mod phenotype;

// Re-exports for convenience
pub use codegen::rule_source;
pub use evolver::{Evolver, EvolverSettings, Member};
pub use function::{roulette, FunctionEntry, FunctionTable};
pub use genotype::{
    DistanceConfig, Genotype, GenotypeConfig, Node, NodeId, ParseError, RemoveMethod,
};
pub use phenotype::{Connection, Fetch, Phenotype, PhenotypeNode};
