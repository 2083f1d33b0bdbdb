//! Wall-clock measurement and speedup comparison.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::error::{BenchError, Result};
use crate::invoker;
use crate::matrix::Matrix;
use crate::registry::KernelDescriptor;

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// One successful, timed invocation. Never changed once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingResult {
    name: String,
    #[serde(rename = "seconds", serialize_with = "serialize_secs")]
    elapsed: Duration,
    size: usize,
    description: String,
}

impl TimingResult {
    pub fn new(name: impl Into<String>, elapsed: Duration, size: usize, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elapsed,
            size,
            description: description.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Times one call of `f` on the monotonic clock.
pub fn time<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

/// Times a kernel invocation and keeps its product.
///
/// On error nothing is recorded and the error propagates.
pub fn measure_with_output(
    descriptor: &KernelDescriptor,
    a: &Matrix,
    b: &Matrix,
    size: usize,
) -> Result<(TimingResult, Matrix)> {
    let (product, elapsed) = time(|| invoker::invoke(descriptor, a, b, size));
    let product = product?;
    let result = TimingResult::new(descriptor.name(), elapsed, size, descriptor.description());
    Ok((result, product))
}

/// Times a kernel invocation.
pub fn measure(descriptor: &KernelDescriptor, a: &Matrix, b: &Matrix, size: usize) -> Result<TimingResult> {
    measure_with_output(descriptor, a, b, size).map(|(result, _)| result)
}

/// `baseline / result`, or `0.0` when the result took no measurable time.
pub fn speedup(result: &TimingResult, baseline: &Baseline) -> f64 {
    let time = result.seconds();
    if time == 0.0 {
        return 0.0;
    }
    baseline.seconds / time
}

/// The result every speedup in a run is computed against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub name: String,
    pub seconds: f64,
}

impl Baseline {
    /// `preferred` when it has a result, otherwise the fastest result.
    ///
    /// Ties on time keep the earliest recorded result; the speedups do not
    /// depend on which of the tied names is picked.
    pub fn select(results: &ResultSet, preferred: &str) -> Option<Baseline> {
        let chosen = results.get(preferred).or_else(|| {
            results
                .iter()
                .fold(None::<&TimingResult>, |best, r| match best {
                    Some(b) if b.elapsed() <= r.elapsed() => Some(b),
                    _ => Some(r),
                })
        })?;
        Some(Baseline {
            name: chosen.name().to_string(),
            seconds: chosen.seconds(),
        })
    }
}

/// Timing results of one run, in the order kernels were measured.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    results: IndexMap<String, TimingResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result. A name can only be recorded once per run.
    pub fn record(&mut self, result: TimingResult) -> Result<()> {
        if self.results.contains_key(result.name()) {
            return Err(BenchError::DuplicateKernel(result.name().to_string()));
        }
        self.results.insert(result.name().to_string(), result);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TimingResult> {
        self.results.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimingResult> {
        self.results.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
