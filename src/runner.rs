//! Run orchestrator.
//!
//! Measures one kernel at a time, strictly in order. A failure in one
//! kernel is recorded and the run moves on to the next.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::error::{BenchError, Result};
use crate::matrix::Matrix;
use crate::registry::{KernelRegistry, RegistryBuilder};
use crate::timing::{self, Baseline, ResultSet, TimingResult};
use crate::vectorized;

/// Kernel whose product the others are checked against.
pub const REFERENCE_KERNEL: &str = "basic";

/// A kernel whose measurement (or registration) failed.
#[derive(Debug, Serialize)]
pub struct KernelFailure {
    pub name: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: BenchError,
}

fn serialize_error<S: Serializer>(err: &BenchError, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&error_chain(err))
}

/// `error: cause: cause ...`
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Everything one run produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub size: usize,
    pub results: ResultSet,
    /// `true` when the product matched the reference bit for bit.
    pub verified: IndexMap<String, bool>,
    /// Kernels that were requested but not available, and repeated requests.
    pub skipped: Vec<String>,
    pub failures: Vec<KernelFailure>,
    pub baseline: Option<Baseline>,
}

impl RunReport {
    /// Speedup of `result` against this run's baseline.
    pub fn speedup(&self, result: &TimingResult) -> Option<f64> {
        self.baseline.as_ref().map(|b| timing::speedup(result, b))
    }

    pub fn failed(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.name == name)
    }
}

/// One benchmark run. Results are owned by the run and dropped with it.
pub struct BenchmarkRun {
    config: RunConfig,
    registry: KernelRegistry,
    skipped: Vec<String>,
    failures: Vec<KernelFailure>,
}

impl BenchmarkRun {
    /// Registers the in-tree kernels and then every configured unit.
    ///
    /// A unit that cannot be loaded is skipped; a unit whose declared
    /// signature is wrong is reported as a failure. Neither stops the run.
    pub fn new(config: RunConfig) -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        builder.register_builtins()?;

        let mut skipped = Vec::new();
        let mut failures = Vec::new();
        for unit in &config.units {
            match builder.register_unit(unit) {
                Ok(_) => {}
                Err(err @ BenchError::UnitLoad { .. }) => {
                    warn!(unit = %unit.name, error = %error_chain(&err), "skipping kernel unit");
                    skipped.push(unit.name.clone());
                }
                Err(err) => {
                    error!(unit = %unit.name, error = %error_chain(&err), "kernel unit rejected");
                    failures.push(KernelFailure {
                        name: unit.name.clone(),
                        error: err,
                    });
                }
            }
        }

        Ok(Self::with_registry(config, builder.build(), skipped, failures))
    }

    /// Runs against a prepared registry.
    pub fn from_registry(config: RunConfig, registry: KernelRegistry) -> Self {
        Self::with_registry(config, registry, Vec::new(), Vec::new())
    }

    fn with_registry(
        config: RunConfig,
        registry: KernelRegistry,
        skipped: Vec<String>,
        failures: Vec<KernelFailure>,
    ) -> Self {
        Self {
            config,
            registry,
            skipped,
            failures,
        }
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Measures every requested kernel, then the in-process baselines.
    pub fn run(self) -> RunReport {
        let BenchmarkRun {
            config,
            registry,
            mut skipped,
            mut failures,
        } = self;

        let size = config.size;
        info!(size, kernels = registry.len(), "starting benchmark run");
        let (a, b) = Matrix::test_pair(size);

        let mut results = ResultSet::new();
        let mut products: IndexMap<String, Matrix> = IndexMap::new();

        let mut requested: Vec<String> = Vec::new();
        for name in config.kernel_order() {
            if requested.contains(&name) {
                warn!(kernel = %name, "kernel listed more than once, skipping the repeat");
                skipped.push(name);
                continue;
            }
            requested.push(name.clone());
            // Units already reported while loading.
            if skipped.contains(&name) || failures.iter().any(|f| f.name == name) {
                continue;
            }
            let Some(descriptor) = registry.lookup(&name) else {
                warn!(kernel = %name, "kernel not available, skipping");
                skipped.push(name);
                continue;
            };

            info!(kernel = %name, size, "measuring");
            let before = descriptor.allocation_stats();
            let outcome = timing::measure_with_output(descriptor, &a, &b, size);
            let delta = descriptor.allocation_stats().since(before);
            if !delta.is_balanced() {
                error!(
                    kernel = %name,
                    allocations = delta.allocations,
                    releases = delta.releases,
                    "external allocations not balanced"
                );
            }

            record(&mut results, &mut products, &mut failures, name, outcome);
        }

        if config.include_native {
            let outcome = vectorized::measure_native(&a, &b, size);
            record(&mut results, &mut products, &mut failures, vectorized::NATIVE.to_string(), outcome);
        }
        if config.include_ndarray {
            let outcome = vectorized::measure_ndarray(&a, &b, size);
            record(&mut results, &mut products, &mut failures, vectorized::NDARRAY.to_string(), outcome);
        }

        let verified = if config.verify && size > 0 {
            verify_products(&a, &b, &products)
        } else {
            IndexMap::new()
        };
        for (name, ok) in &verified {
            if !ok {
                error!(kernel = %name, "product differs from the reference");
            }
        }

        let baseline = Baseline::select(&results, &config.baseline);
        if let Some(baseline) = &baseline {
            info!(baseline = %baseline.name, seconds = baseline.seconds, "selected baseline");
        }

        RunReport {
            size,
            results,
            verified,
            skipped,
            failures,
            baseline,
        }
    }
}

fn record(
    results: &mut ResultSet,
    products: &mut IndexMap<String, Matrix>,
    failures: &mut Vec<KernelFailure>,
    name: String,
    outcome: Result<(TimingResult, Matrix)>,
) {
    match outcome.and_then(|(result, product)| {
        info!(kernel = %name, seconds = result.seconds(), "finished");
        results.record(result)?;
        Ok(product)
    }) {
        Ok(product) => {
            products.insert(name, product);
        }
        Err(err) => {
            error!(kernel = %name, error = %error_chain(&err), "kernel failed");
            failures.push(KernelFailure { name, error: err });
        }
    }
}

/// Checks every product against `basic`'s, or the reference product when
/// `basic` did not run.
fn verify_products(a: &Matrix, b: &Matrix, products: &IndexMap<String, Matrix>) -> IndexMap<String, bool> {
    let computed;
    let reference = match products.get(REFERENCE_KERNEL) {
        Some(product) => product,
        None => {
            computed = a.multiply_reference(b);
            &computed
        }
    };

    products
        .iter()
        .map(|(name, product)| (name.clone(), product == reference))
        .collect()
}
