//! Benchmark harness for matrix-multiplication kernels behind the C ABI.
//!
//! Every kernel, whether compiled into this crate or loaded from a shared
//! library, has the same entry point:
//!
//! ```text
//! void matrixmultiply_<variant>(int size, int **A, int **B, int **C);
//! ```
//!
//! The harness copies host matrices into externally allocated row tables,
//! calls the kernel, copies C back, and releases all three tables on every
//! path out of the call. Timing wraps that whole round trip.
//!
//! ## Usage
//!
//! ```
//! use matbench::{KernelRegistry, Matrix, invoke};
//!
//! let registry = KernelRegistry::with_builtins().unwrap();
//! let (a, b) = Matrix::test_pair(4);
//!
//! let basic = registry.lookup("basic").unwrap();
//! let c = invoke(basic, &a, &b, 4).unwrap();
//!
//! assert_eq!(c, a.multiply_reference(&b));
//! ```
//!
//! A full run measures every kernel in order and picks a baseline:
//!
//! ```no_run
//! use matbench::{BenchmarkRun, RunConfig};
//!
//! let config = RunConfig { size: 256, ..RunConfig::default() };
//! let report = BenchmarkRun::new(config).unwrap().run();
//!
//! for result in report.results.iter() {
//!     println!("{}: {:.4}s", result.name(), result.seconds());
//! }
//! ```
//!
//! ## What's inside
//!
//! - Buffer bridge with owned external handles (`bridge`)
//! - Registry with signature checks at load time (`registry`)
//! - Five in-tree kernels: basic, multithread, blocked, AVX2, combined
//! - Shared-library units via `libloading`
//! - `ndarray` and host triple-loop reference points

pub mod bridge;
pub mod config;
pub mod error;
pub mod invoker;
pub mod kernels;
pub mod matrix;
pub mod registry;
pub mod report;
pub mod runner;
pub mod timing;
pub mod vectorized;

pub use bridge::{CAllocator, CountingAllocator, ExternalAllocator, ExternalMatrix};
pub use config::RunConfig;
pub use error::{BenchError, KernelFault, Result};
pub use invoker::invoke;
pub use kernels::OptimizationProfile;
pub use matrix::Matrix;
pub use registry::{KernelDescriptor, KernelEntry, KernelRegistry, KernelSignature, RegistryBuilder};
pub use runner::{BenchmarkRun, RunReport};
pub use timing::{Baseline, ResultSet, TimingResult, measure, speedup};
