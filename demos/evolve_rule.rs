//! Evolving a rule to approximate XOR, then emitting it as kernel source.
//!
//! This example evolves a two-input rule against the XOR truth table using
//! the host interpreter for fitness, and prints the kernel-source rendition
//! of the champion at the end.
//!
//! Run with: `cargo run --example evolve_rule`

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rulenet::{rule_source, Evolver, EvolverSettings, FunctionTable, GenotypeConfig, Phenotype};

fn main() {
    env_logger::init();

    println!("Rulenet XOR Example");
    println!("===================\n");

    let settings = EvolverSettings {
        population_size: 150,
        num_elites: 5,
        genotype: GenotypeConfig {
            add_node_chance: 0.2,
            add_connection_chance: 0.3,
            perturbation_chance: 0.6,
            perturbation_magnitude: 0.5,
            ..GenotypeConfig::default()
        },
        ..EvolverSettings::default()
    };

    let generations = 100;
    let seed = 42;

    let table = FunctionTable::standard();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut evolver = Evolver::new(2, 1, settings, &mut rng);

    println!("Population: {}", evolver.members().len());
    println!("Generations: {}", generations);
    println!();

    let cases = [
        ([0.0_f32, 0.0], 0.0_f32),
        ([0.0, 1.0], 1.0),
        ([1.0, 0.0], 1.0),
        ([1.0, 1.0], 0.0),
    ];

    let score = |phenotype: &mut Phenotype, table: &FunctionTable| -> f32 {
        let mut error = 0.0;
        for (inputs, expected) in &cases {
            let mut outputs = [0.0];
            let mut registers = vec![0.0; phenotype.recurrent_len()];
            phenotype.execute(inputs, &mut outputs, &mut registers, table);
            error += (outputs[0] - expected).powi(2);
        }
        4.0 - error
    };

    let mut best_fitness = f32::NEG_INFINITY;
    let mut solution_generation = None;

    for generation in 0..generations {
        evolver.evaluate_with(|genotype| {
            let mut phenotype = Phenotype::from_genotype(genotype);
            score(&mut phenotype, &table)
        });

        let best = evolver.best().expect("non-empty population");

        if best.fitness > best_fitness {
            best_fitness = best.fitness;
        }

        if best.fitness >= 3.9 && solution_generation.is_none() {
            solution_generation = Some(generation);
        }

        if generation % 10 == 0 || generation == generations - 1 {
            let mean: f32 = evolver.members().iter().map(|m| m.fitness).sum::<f32>()
                / evolver.members().len() as f32;
            println!(
                "Gen {:3}: best={:.4}, mean={:.4}, nodes={}",
                generation,
                best.fitness,
                mean,
                best.genotype.nodes.len()
            );
        }

        evolver.epoch(&mut rng);
    }

    // Re-score the final generation and present the champion
    evolver.evaluate_with(|genotype| {
        let mut phenotype = Phenotype::from_genotype(genotype);
        score(&mut phenotype, &table)
    });

    let champion = evolver.best().expect("non-empty population");

    println!();
    println!("Evolution Complete!");
    println!("===================");
    println!("Best fitness: {:.4}", champion.fitness);
    println!("Nodes: {}", champion.genotype.nodes.len());
    if let Some(generation) = solution_generation {
        println!("Solution found at generation: {}", generation);
    }

    let mut phenotype = Phenotype::from_genotype(&champion.genotype);

    println!("\nChampion XOR outputs:");
    for (inputs, expected) in &cases {
        let mut outputs = [0.0];
        let mut registers = vec![0.0; phenotype.recurrent_len()];
        phenotype.execute(inputs, &mut outputs, &mut registers, &table);
        println!(
            "  {} XOR {} = {:.4} (expected {})",
            inputs[0] as i32, inputs[1] as i32, outputs[0], *expected as i32
        );
    }

    println!("\nGenerated kernel source:\n");
    println!("{}", rule_source(&phenotype, "xorRule", &table.names()));
}
