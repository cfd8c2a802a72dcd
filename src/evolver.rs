//! Generational evolution of rule genotypes.
//!
//! The [`Evolver`] owns a fixed-size population of genotype/fitness pairs and
//! replaces it wholesale each [`epoch`](Evolver::epoch): fitness is
//! normalized so the minimum is zero, the top `num_elites` members are copied
//! forward unchanged, and the remaining slots are filled by crossover plus
//! mutation of selected parents.
//!
//! Parent selection is speciation-aware without persistent species objects:
//! the first parent is drawn fitness-proportionally from the whole
//! population; the second preferentially from genotypes within a structural
//! distance tolerance of the first, each candidate's weight penalized by its
//! distance, falling back to the single least-dissimilar genotype when
//! nothing is within tolerance.
//!
//! Fitness evaluation stays outside the core: the caller scores each member
//! between epochs (typically by compiling the genotype and running it inside
//! the surrounding simulation) and the evolver only consumes the resulting
//! floats.

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::function::roulette;
use crate::genotype::{DistanceConfig, Genotype, GenotypeConfig};

/// One population slot.
#[derive(Debug, Clone)]
pub struct Member {
    pub genotype: Genotype,
    pub fitness: f32,
}

/// Evolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolverSettings {
    /// Fixed population size.
    pub population_size: usize,
    /// Members copied forward unchanged each epoch, by fitness rank.
    pub num_elites: usize,
    /// Probability that crossover averages a matched value instead of picking
    /// one parent's.
    pub average_chance: f32,
    /// Maximum structural distance for a second parent to count as a mate of
    /// the same niche.
    pub speciation_tolerance: f32,
    /// How strongly a candidate's distance from the first parent reduces its
    /// selection weight.
    pub prefer_similar_factor: f32,
    /// Cap on the candidate list, as a ratio of the population size.
    pub compatible_choose_ratio: f32,
    /// Mutation and initialization parameters for the genotypes.
    pub genotype: GenotypeConfig,
    /// Structural distance weighting.
    pub distance: DistanceConfig,
}

impl Default for EvolverSettings {
    fn default() -> Self {
        Self {
            population_size: 40,
            num_elites: 6,
            average_chance: 0.5,
            speciation_tolerance: 2.2,
            prefer_similar_factor: 0.05,
            compatible_choose_ratio: 0.5,
            genotype: GenotypeConfig::default(),
            distance: DistanceConfig::default(),
        }
    }
}

/// Fixed-size population under fitness-weighted generational replacement.
#[derive(Debug)]
pub struct Evolver {
    settings: EvolverSettings,
    members: Vec<Member>,
    generation: usize,
}

impl Evolver {
    /// Create generation zero: `population_size` independent random
    /// feed-forward genotypes with the given arity.
    #[must_use]
    pub fn new<R: Rng>(
        num_inputs: usize,
        num_outputs: usize,
        settings: EvolverSettings,
        rng: &mut R,
    ) -> Self {
        let members = (0..settings.population_size)
            .map(|_| Member {
                genotype: Genotype::random_feed_forward(
                    num_inputs,
                    num_outputs,
                    &settings.genotype,
                    rng,
                ),
                fitness: 0.0,
            })
            .collect();

        Self {
            settings,
            members,
            generation: 0,
        }
    }

    /// The current population.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Mutable access for fitness assignment between epochs.
    pub fn members_mut(&mut self) -> &mut [Member] {
        &mut self.members
    }

    /// Assign one member's fitness.
    pub fn set_fitness(&mut self, index: usize, fitness: f32) {
        self.members[index].fitness = fitness;
    }

    /// Score every member with the caller's fitness function.
    pub fn evaluate_with(&mut self, mut evaluate: impl FnMut(&Genotype) -> f32) {
        for member in &mut self.members {
            member.fitness = evaluate(&member.genotype);
        }
    }

    /// Completed epoch count.
    #[must_use]
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// The fittest member, if any.
    #[must_use]
    pub fn best(&self) -> Option<&Member> {
        self.members.iter().max_by(|a, b| {
            a.fitness
                .partial_cmp(&b.fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Replace the population with the next generation.
    ///
    /// Assumes fitness has been assigned for the current generation.
    pub fn epoch<R: Rng>(&mut self, rng: &mut R) {
        assert!(
            self.members.len() >= 2,
            "population of {} cannot reproduce",
            self.members.len()
        );

        self.normalize_fitness();

        let best = self.best().map_or(0.0, |member| member.fitness);
        let mean = self.members.iter().map(|m| m.fitness).sum::<f32>() / self.members.len() as f32;

        // Fitness-ranked indices for elite copying
        let mut ranked: Vec<usize> = (0..self.members.len()).collect();
        ranked.sort_by(|&a, &b| {
            self.members[b]
                .fitness
                .partial_cmp(&self.members[a].fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let num_elites = self.settings.num_elites.min(self.members.len());
        let mut next: Vec<Member> = ranked[..num_elites]
            .iter()
            .map(|&index| self.members[index].clone())
            .collect();

        while next.len() < self.settings.population_size {
            let (first, second) = self.select_parents(rng);

            let mut child = Genotype::from_parents(
                &self.members[first].genotype,
                &self.members[second].genotype,
                self.settings.average_chance,
                rng,
            );
            child.mutate(&self.settings.genotype, rng);

            next.push(Member {
                genotype: child,
                fitness: 0.0,
            });
        }

        self.members = next;
        self.generation += 1;

        debug!(
            "epoch {}: best={:.4} mean={:.4} (normalized), {} elites kept",
            self.generation, best, mean, num_elites
        );
    }

    /// Shift all fitness values so the minimum is zero.
    fn normalize_fitness(&mut self) {
        let min = self
            .members
            .iter()
            .map(|member| member.fitness)
            .fold(f32::INFINITY, f32::min);

        if min.is_finite() {
            for member in &mut self.members {
                member.fitness -= min;
            }
        }
    }

    /// Pick two distinct parent indices.
    fn select_parents<R: Rng>(&self, rng: &mut R) -> (usize, usize) {
        let weights: Vec<f32> = self.members.iter().map(|member| member.fitness).collect();
        let first = roulette(&weights, rng);

        let max_candidates = ((self.settings.compatible_choose_ratio
            * self.members.len() as f32) as usize)
            .max(1);

        let mut candidates: Vec<(usize, f32)> = Vec::new();

        let mut least_dissimilar = usize::from(first == 0);
        let mut least_distance = f32::INFINITY;

        for index in 0..self.members.len() {
            if index == first {
                continue;
            }

            let distance = self.members[first].genotype.distance(
                &self.members[index].genotype,
                &self.settings.distance,
            );

            if distance < least_distance {
                least_distance = distance;
                least_dissimilar = index;
            }

            if distance < self.settings.speciation_tolerance {
                let weight = (self.members[index].fitness
                    - distance * self.settings.prefer_similar_factor)
                    .max(0.0);
                candidates.push((index, weight));

                if candidates.len() >= max_candidates {
                    break;
                }
            }
        }

        if candidates.is_empty() {
            return (first, least_dissimilar);
        }

        let candidate_weights: Vec<f32> =
            candidates.iter().map(|&(_, weight)| weight).collect();
        let second = candidates[roulette(&candidate_weights, rng)].0;

        (first, second)
    }
}
