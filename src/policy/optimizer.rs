//! Population-based stochastic optimizers for the predictive policy.
//!
//! The optimizer and the fitness function are decoupled: anything matching
//! [`StochasticOptimizer`] can drive the policy. The default is a
//! generational genetic search with elitism; a differential-evolution
//! variant is provided as a drop-in alternative.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OptimizerParams;
use crate::rng::DeterministicRng;

/// A candidate action: (offload fraction, normalized CPU, normalized power).
pub type Genes = [f64; 3];

/// Per-gene search bounds: alpha in [0, 1], f-hat in [0.1, 1], p-hat in [0, 1].
pub const GENE_BOUNDS: [(f64, f64); 3] = [(0.0, 1.0), (0.1, 1.0), (0.0, 1.0)];

/// Fitness above this level marks an individual as infeasible in telemetry.
pub const INFEASIBLE_FITNESS: f64 = 1e5;

/// A candidate with its evaluated cost (lower is better).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Individual {
    /// Normalized action genes
    pub genes: Genes,
    /// Evaluated rollout cost
    pub fitness: f64,
}

/// One generation's telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerLogEntry {
    /// Slot being decided
    pub slot: usize,
    /// Sensor the decision belongs to
    pub sensor_id: String,
    /// Generation index within the decision
    pub generation: usize,
    /// Best-ever fitness so far
    pub best_fitness: f64,
    /// Mean fitness of the current population
    pub avg_fitness: f64,
    /// Individuals with fitness above [`INFEASIBLE_FITNESS`]
    pub infeasible_count: usize,
    /// Wall-clock milliseconds since this decision's optimization began
    pub elapsed_ms: f64,
}

/// Identifies the decision being optimized and carries its time budget.
#[derive(Debug, Clone)]
pub struct OptimizeContext {
    /// Slot being decided
    pub slot: usize,
    /// Sensor the decision belongs to
    pub sensor_id: String,
    /// Hard wall-clock cutoff; past it the best-so-far is returned
    pub deadline: Option<Instant>,
}

/// Result of one optimization: the best individual plus telemetry.
#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    /// Best individual found across all generations and restarts
    pub best: Individual,
    /// One entry per completed generation
    pub log: Vec<OptimizerLogEntry>,
}

/// A bounded minimizer over the three-gene action space.
pub trait StochasticOptimizer {
    /// Minimizes `fitness` within [`GENE_BOUNDS`].
    ///
    /// Implementations must consume randomness only from `rng` so that a
    /// fixed seed reproduces the search path exactly.
    fn optimize(
        &self,
        fitness: &mut dyn FnMut(&Genes) -> f64,
        rng: &mut DeterministicRng,
        ctx: &OptimizeContext,
    ) -> OptimizerOutcome;
}

fn random_genes(rng: &mut DeterministicRng) -> Genes {
    let mut genes = [0.0; 3];
    for (gene, (lo, hi)) in genes.iter_mut().zip(GENE_BOUNDS) {
        *gene = rng.uniform(lo, hi);
    }
    genes
}

fn clamp_genes(genes: &mut Genes) {
    for (gene, (lo, hi)) in genes.iter_mut().zip(GENE_BOUNDS) {
        *gene = gene.clamp(lo, hi);
    }
}

/// Ascending by fitness; NaN sinks to the end so it can never win.
fn sort_by_fitness(population: &mut [Individual]) {
    population.sort_by(|a, b| {
        a.fitness
            .partial_cmp(&b.fitness)
            .unwrap_or(std::cmp::Ordering::Greater)
    });
}

fn population_stats(population: &[Individual]) -> (f64, usize) {
    let avg = population.iter().map(|i| i.fitness).sum::<f64>() / population.len() as f64;
    let infeasible = population
        .iter()
        .filter(|i| i.fitness > INFEASIBLE_FITNESS)
        .count();
    (avg, infeasible)
}

fn deadline_passed(ctx: &OptimizeContext) -> bool {
    ctx.deadline.is_some_and(|d| Instant::now() >= d)
}

/// Generational genetic search with elitism, tournament selection,
/// uniform crossover, and Gaussian mutation.
#[derive(Debug, Clone)]
pub struct GeneticOptimizer {
    population: usize,
    generations: usize,
    mutation_prob: f64,
    restarts: usize,
}

/// Tournament size for parent selection.
const TOURNAMENT_SIZE: usize = 3;

/// Mutation standard deviation as a fraction of each gene's range.
const MUTATION_SCALE: f64 = 0.1;

impl GeneticOptimizer {
    /// Creates an optimizer from experiment parameters.
    pub fn new(params: &OptimizerParams) -> Self {
        Self {
            population: params.population.max(2),
            generations: params.generations,
            mutation_prob: params.mutation_prob,
            restarts: params.restarts,
        }
    }

    fn elite_count(&self) -> usize {
        2.max(self.population / 10)
    }

    fn tournament<'a>(
        &self,
        population: &'a [Individual],
        rng: &mut DeterministicRng,
    ) -> &'a Individual {
        let mut best = &population[rng.int_in(0, (population.len() - 1) as i64) as usize];
        for _ in 1..TOURNAMENT_SIZE {
            let candidate = &population[rng.int_in(0, (population.len() - 1) as i64) as usize];
            if candidate.fitness < best.fitness {
                best = candidate;
            }
        }
        best
    }

    fn crossover(&self, a: &Genes, b: &Genes, rng: &mut DeterministicRng) -> Genes {
        let mut child = *a;
        for (gene, &other) in child.iter_mut().zip(b) {
            if rng.bernoulli(0.5) {
                *gene = other;
            }
        }
        child
    }

    fn mutate(&self, genes: &mut Genes, rng: &mut DeterministicRng) {
        for (gene, (lo, hi)) in genes.iter_mut().zip(GENE_BOUNDS) {
            if rng.bernoulli(self.mutation_prob) {
                *gene += rng.gaussian(0.0, MUTATION_SCALE * (hi - lo));
            }
        }
        clamp_genes(genes);
    }

    fn run_once(
        &self,
        fitness: &mut dyn FnMut(&Genes) -> f64,
        rng: &mut DeterministicRng,
        ctx: &OptimizeContext,
        started: Instant,
        log: &mut Vec<OptimizerLogEntry>,
    ) -> Individual {
        let mut population: Vec<Individual> = (0..self.population)
            .map(|_| {
                let genes = random_genes(rng);
                Individual {
                    genes,
                    fitness: fitness(&genes),
                }
            })
            .collect();
        sort_by_fitness(&mut population);

        let mut best = population[0];
        let stagnation_limit = self.generations.div_ceil(2);
        let mut stagnant = 0usize;

        for generation in 0..self.generations {
            if deadline_passed(ctx) {
                break;
            }

            let elites = self.elite_count().min(population.len());
            let mut next = population[..elites].to_vec();
            while next.len() < self.population {
                let parent_a = self.tournament(&population, rng);
                let parent_b = self.tournament(&population, rng);
                let mut genes = self.crossover(&parent_a.genes, &parent_b.genes, rng);
                self.mutate(&mut genes, rng);
                next.push(Individual {
                    genes,
                    fitness: fitness(&genes),
                });
            }
            sort_by_fitness(&mut next);
            population = next;

            if population[0].fitness < best.fitness {
                best = population[0];
                stagnant = 0;
            } else {
                stagnant += 1;
            }

            let (avg_fitness, infeasible_count) = population_stats(&population);
            let entry = OptimizerLogEntry {
                slot: ctx.slot,
                sensor_id: ctx.sensor_id.clone(),
                generation,
                best_fitness: best.fitness,
                avg_fitness,
                infeasible_count,
                elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            };
            debug!(
                slot = entry.slot,
                sensor = %entry.sensor_id,
                generation = entry.generation,
                best = entry.best_fitness,
                avg = entry.avg_fitness,
                infeasible = entry.infeasible_count,
                "optimizer generation"
            );
            log.push(entry);

            if stagnant >= stagnation_limit {
                break;
            }
        }

        best
    }
}

impl StochasticOptimizer for GeneticOptimizer {
    fn optimize(
        &self,
        fitness: &mut dyn FnMut(&Genes) -> f64,
        rng: &mut DeterministicRng,
        ctx: &OptimizeContext,
    ) -> OptimizerOutcome {
        let started = Instant::now();
        let mut log = Vec::new();

        let mut best = self.run_once(&mut *fitness, rng, ctx, started, &mut log);
        for _ in 0..self.restarts {
            if deadline_passed(ctx) {
                break;
            }
            // Restarts re-seed from the current stream so the whole search
            // stays a function of the original seed.
            let mut restart_rng = rng.fork();
            let candidate = self.run_once(&mut *fitness, &mut restart_rng, ctx, started, &mut log);
            if candidate.fitness < best.fitness {
                best = candidate;
            }
        }

        OptimizerOutcome { best, log }
    }
}

/// Differential evolution (rand/1/bin) behind the same contract.
///
/// Mutant = a + F * (b - c), binomial crossover at rate CR with one forced
/// gene, greedy replacement.
#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    population: usize,
    generations: usize,
    /// Differential weight
    pub f: f64,
    /// Crossover rate
    pub cr: f64,
}

impl DifferentialEvolution {
    /// Creates a DE optimizer with the conventional F = 0.8, CR = 0.9.
    pub fn new(params: &OptimizerParams) -> Self {
        Self {
            population: params.population.max(4),
            generations: params.generations,
            f: 0.8,
            cr: 0.9,
        }
    }
}

impl StochasticOptimizer for DifferentialEvolution {
    fn optimize(
        &self,
        fitness: &mut dyn FnMut(&Genes) -> f64,
        rng: &mut DeterministicRng,
        ctx: &OptimizeContext,
    ) -> OptimizerOutcome {
        let started = Instant::now();
        let mut log = Vec::new();

        let mut population: Vec<Individual> = (0..self.population)
            .map(|_| {
                let genes = random_genes(rng);
                Individual {
                    genes,
                    fitness: fitness(&genes),
                }
            })
            .collect();
        let mut best = *population
            .iter()
            .min_by(|a, b| {
                a.fitness
                    .partial_cmp(&b.fitness)
                    .unwrap_or(std::cmp::Ordering::Greater)
            })
            .unwrap_or(&population[0]);

        for generation in 0..self.generations {
            if deadline_passed(ctx) {
                break;
            }
            for i in 0..population.len() {
                let len = population.len() as i64;
                let mut pick = |exclude: &[usize], rng: &mut DeterministicRng| loop {
                    let j = rng.int_in(0, len - 1) as usize;
                    if !exclude.contains(&j) {
                        return j;
                    }
                };
                let a = pick(&[i], rng);
                let b = pick(&[i, a], rng);
                let c = pick(&[i, a, b], rng);

                let mut trial = population[i].genes;
                let forced = rng.int_in(0, 2) as usize;
                for g in 0..3 {
                    if g == forced || rng.bernoulli(self.cr) {
                        trial[g] = population[a].genes[g]
                            + self.f * (population[b].genes[g] - population[c].genes[g]);
                    }
                }
                clamp_genes(&mut trial);

                let trial_fitness = fitness(&trial);
                if trial_fitness < population[i].fitness {
                    population[i] = Individual {
                        genes: trial,
                        fitness: trial_fitness,
                    };
                    if trial_fitness < best.fitness {
                        best = population[i];
                    }
                }
            }

            let (avg_fitness, infeasible_count) = population_stats(&population);
            log.push(OptimizerLogEntry {
                slot: ctx.slot,
                sensor_id: ctx.sensor_id.clone(),
                generation,
                best_fitness: best.fitness,
                avg_fitness,
                infeasible_count,
                elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }

        OptimizerOutcome { best, log }
    }
}
