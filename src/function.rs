//! Activation-function table shared by the interpreter and the code generator.
//!
//! Rules never own their activation functions. Every node stores only an index
//! into an externally supplied [`FunctionTable`], which pairs each function's
//! host-side implementation (used by [`Phenotype::execute`]) with the name the
//! function must have in generated kernel source (used by
//! [`rule_source`]). The two views are index-aligned by construction, so a
//! genotype evolved against one table stays meaningful in both worlds.
//!
//! The table must not change for as long as any genotype referencing it is
//! alive.
//!
//! [`Phenotype::execute`]: crate::phenotype::Phenotype::execute
//! [`rule_source`]: crate::codegen::rule_source

use rand::Rng;

/// A single activation function: its name as it must appear verbatim in
/// generated kernel source, and its host-side implementation.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    /// Identifier emitted into kernel source. The surrounding kernel
    /// assembler is responsible for providing a matching definition.
    pub name: String,
    /// Host-side evaluation used by the interpreter.
    pub eval: fn(f32) -> f32,
}

impl FunctionEntry {
    /// Create an entry from a name and an evaluation function.
    #[must_use]
    pub fn new(name: impl Into<String>, eval: fn(f32) -> f32) -> Self {
        Self {
            name: name.into(),
            eval,
        }
    }
}

/// Ordered activation-function table.
///
/// Index alignment with every genotype's function indices is the caller's
/// contract; see the module docs.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    entries: Vec<FunctionEntry>,
}

impl FunctionTable {
    /// Build a table from explicit entries.
    #[must_use]
    pub fn new(entries: Vec<FunctionEntry>) -> Self {
        Self { entries }
    }

    /// The default rule dialect: linear, sigmoid, tanh, relu, sine, gaussian,
    /// absolute and step, in that order.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            FunctionEntry::new("linear", linear),
            FunctionEntry::new("sigmoid", sigmoid),
            FunctionEntry::new("tanh", tanh),
            FunctionEntry::new("relu", relu),
            FunctionEntry::new("sine", sine),
            FunctionEntry::new("gaussian", gaussian),
            FunctionEntry::new("absolute", absolute),
            FunctionEntry::new("step", step),
        ])
    }

    /// Number of functions in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kernel-source name of the function at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        &self.entries[index].name
    }

    /// All kernel-source names, index-aligned, for handing to the code
    /// generator.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Apply the function at `index` to `x`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    #[must_use]
    pub fn eval(&self, index: usize, x: f32) -> f32 {
        (self.entries[index].eval)(x)
    }
}

fn linear(x: f32) -> f32 {
    x
}

fn sigmoid(x: f32) -> f32 {
    // Clamp to avoid exp overflow: sigmoid(-88) ~ 0, sigmoid(88) ~ 1
    let clamped = x.clamp(-88.0, 88.0);
    1.0 / (1.0 + (-clamped).exp())
}

fn tanh(x: f32) -> f32 {
    x.tanh()
}

fn relu(x: f32) -> f32 {
    x.max(0.0)
}

fn sine(x: f32) -> f32 {
    if x.is_infinite() {
        return 0.0;
    }
    x.sin()
}

fn gaussian(x: f32) -> f32 {
    // For |x| > 26 the result underflows to 0 anyway
    if x.is_infinite() || x.abs() > 26.0 {
        0.0
    } else {
        (-x * x).exp()
    }
}

fn absolute(x: f32) -> f32 {
    x.abs()
}

fn step(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Weighted proportional ("roulette") index selection.
///
/// Index `i` is chosen with probability proportional to `weights[i]`.
/// Returns 0 when the weights are empty or sum to zero or less.
pub fn roulette<R: Rng>(weights: &[f32], rng: &mut R) -> usize {
    let sum: f32 = weights.iter().sum();

    if weights.is_empty() || sum <= 0.0 {
        return 0;
    }

    let cusp = rng.random::<f32>() * sum;

    let mut so_far = 0.0;

    for (i, &weight) in weights.iter().enumerate() {
        so_far += weight;

        if so_far >= cusp {
            return i;
        }
    }

    weights.len() - 1
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
    fn test_standard_table_alignment() {
        let table = FunctionTable::standard();
        assert_eq!(table.len(), 8);
        assert_eq!(table.names().len(), table.len());
        assert_eq!(table.name(0), "linear");
        assert_eq!(table.name(1), "sigmoid");
    }

    #[test]
    fn test_standard_table_finite_on_finite_input() {
        let table = FunctionTable::standard();
        for index in 0..table.len() {
            for &x in &[-100.0, -1.0, 0.0, 0.5, 1.0, 100.0] {
                assert!(
                    table.eval(index, x).is_finite(),
                    "{} not finite at {}",
                    table.name(index),
                    x
                );
            }
        }
    }

    #[test]
    fn test_sigmoid() {
        let table = FunctionTable::standard();
        assert!((table.eval(1, 0.0) - 0.5).abs() < 1e-6);
        assert!(table.eval(1, 10.0) > 0.99);
        assert!(table.eval(1, -10.0) < 0.01);
    }

    #[test]
    fn test_gaussian() {
        let table = FunctionTable::standard();
        assert!((table.eval(5, 0.0) - 1.0).abs() < 1e-6);
        assert!(table.eval(5, 3.0) < 0.001);
        assert!(table.eval(5, 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_step() {
        let table = FunctionTable::standard();
        assert!((table.eval(7, 0.1) - 1.0).abs() < 1e-6);
        assert!(table.eval(7, 0.0).abs() < 1e-6);
        assert!(table.eval(7, -0.1).abs() < 1e-6);
    }

    #[test]
    fn test_roulette_degenerate_weights() {
        let mut rng = test_rng();
        assert_eq!(roulette(&[], &mut rng), 0);
        assert_eq!(roulette(&[0.0, 0.0], &mut rng), 0);
    }

    #[test]
    fn test_roulette_respects_zero_weight() {
        let mut rng = test_rng();
        for _ in 0..100 {
            let index = roulette(&[0.0, 1.0, 0.0], &mut rng);
            assert_eq!(index, 1);
        }
    }

    #[test]
    fn test_roulette_distribution() {
        let mut rng = test_rng();
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            counts[roulette(&[1.0, 2.0, 1.0], &mut rng)] += 1;
        }
        // Middle index carries half the weight
        assert!(counts[1] > counts[0]);
        assert!(counts[1] > counts[2]);
        assert!(counts[0] > 300 && counts[2] > 300);
    }
}
