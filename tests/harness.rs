use std::error::Error as _;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use libc::c_int;
use matbench::bridge::{self, AllocationStats, RowTable};
use matbench::kernels::basic::matrixmultiply_basic;
use matbench::kernels::unit_abi::{create_matrix, free_matrix};
use matbench::registry::{UnitAllocator, UnitOrigin, UnitSpec, ValueKind};
use matbench::report::write_json;
use matbench::timing::{Baseline, ResultSet, TimingResult, speedup};
use matbench::{
    BenchError, BenchmarkRun, CAllocator, CountingAllocator, ExternalAllocator, KernelEntry, KernelRegistry,
    KernelSignature, Matrix, OptimizationProfile, RegistryBuilder, RunConfig, invoke, measure,
};

unsafe extern "C-unwind" fn exploding_kernel(
    _n: c_int,
    _a: *mut *mut c_int,
    _b: *mut *mut c_int,
    _c: *mut *mut c_int,
) {
    panic!("kernel exploded");
}

/// `create_matrix` whose last row allocation "failed".
unsafe extern "C-unwind" fn create_with_null_row(size: c_int) -> *mut *mut c_int {
    let table = create_matrix(size);
    if !table.is_null() {
        unsafe {
            let last = table.add(size as usize - 1);
            libc::free(*last as *mut libc::c_void);
            *last = std::ptr::null_mut();
        }
    }
    table
}

/// Delegates to the C allocator and remembers the largest size asked for.
#[derive(Default)]
struct LargestSize(std::sync::atomic::AtomicUsize);

unsafe impl ExternalAllocator for LargestSize {
    fn allocate(&self, size: usize) -> matbench::Result<RowTable> {
        self.0.fetch_max(size, std::sync::atomic::Ordering::SeqCst);
        CAllocator.allocate(size)
    }

    unsafe fn deallocate(&self, table: RowTable, size: usize) {
        unsafe { CAllocator.deallocate(table, size) }
    }

    fn name(&self) -> &str {
        "largest"
    }
}

/// The cdylib cargo builds next to the test binaries.
fn built_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    let file = libloading::library_filename("matbench");
    [deps.join(&file), deps.parent().unwrap().join(&file)]
        .into_iter()
        .find(|path| path.exists())
        .unwrap_or_else(|| panic!("{:?} not found next to {}", file, exe.display()))
}

fn shared_blocked_unit() -> UnitSpec {
    UnitSpec {
        name: "shared_blocked".into(),
        path: built_library(),
        symbol: "matrixmultiply_blocked_adaptive".into(),
        signature: "(int, int**, int**, int**) -> void".into(),
        profile: Some(OptimizationProfile::Blocked),
    }
}

fn quiet_config(size: usize, kernels: &[&str]) -> RunConfig {
    RunConfig {
        size,
        kernels: kernels.iter().map(|k| k.to_string()).collect(),
        include_native: false,
        include_ndarray: false,
        ..RunConfig::default()
    }
}

// ============================================================
// Buffer bridge
// ============================================================

#[test]
fn test_round_trip_preserves_every_element() {
    let allocator = CAllocator;
    for size in [1, 2, 5, 16, 33] {
        let m = Matrix::from_fn(size, |i, j| (i * 1000 + j) as i32 - 500);
        let handle = bridge::to_external(&m, size, &allocator).unwrap();

        assert_eq!(handle.size(), size);
        assert_eq!(handle.get(size - 1, 0), m.get(size - 1, 0));
        assert_eq!(bridge::to_native(&handle, size).unwrap(), m);

        bridge::release(handle);
    }
}

#[test]
fn test_release_returns_every_allocation() {
    let counting = CountingAllocator::new(Arc::new(CAllocator));
    let (a, _) = Matrix::test_pair(8);

    let handle = bridge::to_external(&a, 8, &counting).unwrap();
    assert_eq!(counting.stats().live(), 1);

    let copy = bridge::to_native(&handle, 8).unwrap();
    assert_eq!(counting.stats().live(), 1, "to_native must not release");
    bridge::release(handle);

    assert_eq!(copy, a);
    assert_eq!(
        counting.stats(),
        AllocationStats {
            allocations: 1,
            releases: 1
        }
    );
}

#[test]
fn test_to_external_rejects_wrong_shape() {
    let counting = CountingAllocator::new(Arc::new(CAllocator));
    let ragged = Matrix::from_rows(vec![vec![1, 2], vec![3]]);

    let err = bridge::to_external(&ragged, 2, &counting).err().unwrap();

    assert!(matches!(err, BenchError::DimensionMismatch { .. }));
    assert_eq!(counting.calls(), 0);
}

#[test]
fn test_to_native_rejects_wrong_size() {
    let allocator = CAllocator;
    let handle = bridge::ExternalMatrix::zeroed(&allocator, 3).unwrap();
    assert!(matches!(
        bridge::to_native(&handle, 4),
        Err(BenchError::DimensionMismatch { .. })
    ));
    assert_eq!(bridge::to_native(&handle, 3).unwrap(), Matrix::zeros(3));
}

// ============================================================
// Invoker
// ============================================================

#[test]
fn test_invoke_balances_allocations() {
    let registry = KernelRegistry::with_builtins().unwrap();
    let basic = registry.lookup("basic").unwrap();
    let (a, b) = Matrix::test_pair(16);

    let before = basic.allocation_stats();
    let c = invoke(basic, &a, &b, 16).unwrap();
    let delta = basic.allocation_stats().since(before);

    assert_eq!(c, a.multiply_reference(&b));
    assert_eq!(delta.allocations, 3);
    assert!(delta.is_balanced());
}

#[test]
fn test_kernel_fault_is_surfaced_and_buffers_released() {
    let mut builder = RegistryBuilder::new();
    builder
        .register("exploding", KernelEntry::new(exploding_kernel), KernelSignature::multiply())
        .unwrap();
    let registry = builder.build();
    let descriptor = registry.lookup("exploding").unwrap();
    let (a, b) = Matrix::test_pair(4);

    let err = invoke(descriptor, &a, &b, 4).unwrap_err();

    match &err {
        BenchError::KernelExecution { name, source } => {
            assert_eq!(name, "exploding");
            assert_eq!(source.message(), "kernel exploded");
        }
        other => panic!("expected KernelExecution, got {:?}", other),
    }
    assert!(err.source().is_some(), "fault must be chained");

    let stats = descriptor.allocation_stats();
    assert_eq!(stats.allocations, 3);
    assert!(stats.is_balanced());
}

#[test]
fn test_dimension_mismatch_allocates_nothing() {
    let registry = KernelRegistry::with_builtins().unwrap();
    let basic = registry.lookup("basic").unwrap();
    let (a, _) = Matrix::test_pair(4);
    let (_, b) = Matrix::test_pair(3);

    let err = invoke(basic, &a, &b, 4).unwrap_err();
    assert!(matches!(err, BenchError::DimensionMismatch { operand: "B", rows: 3, .. }));

    let err = invoke(basic, &a, &a, 5).unwrap_err();
    assert!(matches!(err, BenchError::DimensionMismatch { operand: "A", .. }));

    assert_eq!(basic.allocator().calls(), 0);
}

#[test]
fn test_zero_size_is_rejected_before_allocation() {
    let registry = KernelRegistry::with_builtins().unwrap();
    let basic = registry.lookup("basic").unwrap();
    let empty = Matrix::zeros(0);

    let err = invoke(basic, &empty, &empty, 0).unwrap_err();

    assert!(matches!(err, BenchError::InvalidDimension { size: 0 }));
    assert_eq!(basic.allocator().calls(), 0);
}

#[test]
fn test_allocator_exhaustion_releases_partial_buffers() {
    // A and B fit, C does not.
    let limited = CountingAllocator::with_limit(Arc::new(CAllocator), 2);
    let mut builder = RegistryBuilder::new();
    let descriptor = builder
        .register(
            "limited",
            KernelEntry::new(matrixmultiply_basic).with_allocator(Arc::new(limited)),
            KernelSignature::multiply(),
        )
        .unwrap();
    let (a, b) = Matrix::test_pair(4);

    let err = invoke(&descriptor, &a, &b, 4).unwrap_err();

    assert!(matches!(err, BenchError::Allocation { size: 4 }));
    assert_eq!(
        descriptor.allocation_stats(),
        AllocationStats {
            allocations: 2,
            releases: 2
        }
    );
}

#[test]
fn test_unit_allocator_round_trip() {
    // SAFETY: the crate's own pair follows the unit allocation contract.
    let allocator = Arc::new(unsafe { UnitAllocator::new(create_matrix, free_matrix) });
    let mut builder = RegistryBuilder::new();
    let descriptor = builder
        .register(
            "unit_basic",
            KernelEntry::new(matrixmultiply_basic).with_allocator(allocator),
            KernelSignature::multiply(),
        )
        .unwrap();
    let (a, b) = Matrix::test_pair(9);

    let c = invoke(&descriptor, &a, &b, 9).unwrap();

    assert_eq!(c, a.multiply_reference(&b));
    assert!(descriptor.allocation_stats().is_balanced());
}

#[test]
fn test_unit_allocator_rejects_table_with_null_row() {
    // SAFETY: rows may be null; `free_matrix` frees whatever is there.
    let allocator = Arc::new(unsafe { UnitAllocator::new(create_with_null_row, free_matrix) });
    let mut builder = RegistryBuilder::new();
    let descriptor = builder
        .register(
            "null_row",
            KernelEntry::new(matrixmultiply_basic).with_allocator(allocator),
            KernelSignature::multiply(),
        )
        .unwrap();
    let (a, b) = Matrix::test_pair(4);

    let err = invoke(&descriptor, &a, &b, 4).unwrap_err();

    assert!(matches!(err, BenchError::Allocation { size: 4 }));
    assert_eq!(descriptor.allocator().calls(), 1);
    assert_eq!(descriptor.allocation_stats(), AllocationStats::default());
}

#[test]
fn test_custom_allocator_sees_every_request() {
    let allocator = Arc::new(LargestSize::default());
    let mut builder = RegistryBuilder::new();
    let descriptor = builder
        .register(
            "custom",
            KernelEntry::new(matrixmultiply_basic).with_allocator(allocator.clone()),
            KernelSignature::multiply(),
        )
        .unwrap();
    let (a, b) = Matrix::test_pair(6);

    let c = invoke(&descriptor, &a, &b, 6).unwrap();

    assert_eq!(c, a.multiply_reference(&b));
    assert_eq!(allocator.0.load(std::sync::atomic::Ordering::SeqCst), 6);
    assert_eq!(descriptor.allocator().name(), "largest");
    assert!(descriptor.allocation_stats().is_balanced());
}

// ============================================================
// Shared-library units
// ============================================================

#[test]
fn test_shared_library_unit_matches_basic() {
    let spec = shared_blocked_unit();
    let mut builder = RegistryBuilder::new();
    builder.register_builtins().unwrap();

    let unit = builder.register_unit(&spec).unwrap();

    assert!(matches!(unit.origin(), UnitOrigin::Library { path, .. } if *path == spec.path));
    assert_eq!(unit.allocator().name(), "unit");
    assert!(unit.description().contains("matrixmultiply_blocked_adaptive"));
    assert!(unit.description().contains("-march=native"));

    let registry = builder.build();
    let (a, b) = Matrix::test_pair(33);
    let expected = invoke(registry.lookup("basic").unwrap(), &a, &b, 33).unwrap();
    let before = unit.allocation_stats();

    // The descriptor keeps the library open on its own.
    drop(registry);
    let c = invoke(&unit, &a, &b, 33).unwrap();
    let delta = unit.allocation_stats().since(before);

    assert_eq!(c, expected);
    assert_eq!(delta.allocations, 3);
    assert!(delta.is_balanced());
}

#[test]
fn test_shared_library_unit_in_a_run() {
    let mut config = quiet_config(40, &["basic"]);
    config.units.push(shared_blocked_unit());

    let report = BenchmarkRun::new(config).unwrap().run();

    assert_eq!(
        report.results.names().collect::<Vec<_>>(),
        ["basic", "shared_blocked"]
    );
    assert!(report.skipped.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(report.verified.get("shared_blocked"), Some(&true));
}

// ============================================================
// Registry
// ============================================================

#[test]
fn test_signature_mismatch_rejected_at_registration() {
    let mut builder = RegistryBuilder::new();
    let three_args = KernelSignature::new(
        vec![ValueKind::Int, ValueKind::Matrix, ValueKind::Matrix],
        ValueKind::Void,
    );

    let err = builder
        .register("short", KernelEntry::new(matrixmultiply_basic), three_args)
        .unwrap_err();

    match err {
        BenchError::SignatureMismatch { name, found, expected } => {
            assert_eq!(name, "short");
            assert_eq!(found, "(int, int**, int**) -> void");
            assert_eq!(expected, "(int, int**, int**, int**) -> void");
        }
        other => panic!("expected SignatureMismatch, got {:?}", other),
    }
    assert!(builder.build().lookup("short").is_none());
}

#[test]
fn test_signature_parsing() {
    let parsed: KernelSignature = "(int, int **, int**, int**) -> void".parse().unwrap();
    assert!(parsed.is_multiply());

    let no_arrow: KernelSignature = "(c_int, matrix, matrix, matrix)".parse().unwrap();
    assert!(no_arrow.is_multiply());

    let returns_int: KernelSignature = "(int, int**, int**, int**) -> int".parse().unwrap();
    assert!(!returns_int.is_multiply());
    assert_eq!(returns_int.ret(), ValueKind::Int);

    assert!("int, int**".parse::<KernelSignature>().is_err());
    assert!("(float, int**, int**, int**)".parse::<KernelSignature>().is_err());
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut builder = RegistryBuilder::new();
    builder.register_builtins().unwrap();

    let err = builder
        .register("basic", KernelEntry::new(matrixmultiply_basic), KernelSignature::multiply())
        .unwrap_err();

    assert!(matches!(err, BenchError::DuplicateKernel(name) if name == "basic"));
}

#[test]
fn test_lookup_absent_is_not_an_error() {
    let registry = KernelRegistry::with_builtins().unwrap();
    assert!(registry.lookup("strassen").is_none());
    assert_eq!(
        registry.names().collect::<Vec<_>>(),
        ["basic", "multithread", "blocked", "simd", "optimized"]
    );
}

// ============================================================
// Timing and baseline
// ============================================================

fn result(name: &str, millis: u64) -> TimingResult {
    TimingResult::new(name, Duration::from_millis(millis), 64, "")
}

#[test]
fn test_speedup_against_baseline() {
    let mut results = ResultSet::new();
    results.record(result("basic", 800)).unwrap();
    results.record(result("simd", 200)).unwrap();

    let baseline = Baseline::select(&results, "basic").unwrap();

    assert_eq!(baseline.name, "basic");
    assert!((speedup(results.get("simd").unwrap(), &baseline) - 4.0).abs() < 1e-9);
    assert!((speedup(results.get("basic").unwrap(), &baseline) - 1.0).abs() < 1e-9);
}

#[test]
fn test_speedup_of_zero_time_is_zero() {
    let baseline = Baseline {
        name: "basic".into(),
        seconds: 1.0,
    };
    assert_eq!(speedup(&result("instant", 0), &baseline), 0.0);
}

#[test]
fn test_baseline_falls_back_to_fastest() {
    let mut results = ResultSet::new();
    results.record(result("blocked", 300)).unwrap();
    results.record(result("simd", 100)).unwrap();
    results.record(result("optimized", 150)).unwrap();

    let baseline = Baseline::select(&results, "basic").unwrap();

    assert_eq!(baseline.name, "simd");
    assert!(Baseline::select(&ResultSet::new(), "basic").is_none());
}

#[test]
fn test_baseline_independent_of_measurement_order() {
    let timings = [("basic", 900), ("multithread", 300), ("blocked", 450), ("simd", 120)];

    let mut forward = ResultSet::new();
    for (name, ms) in timings {
        forward.record(result(name, ms)).unwrap();
    }
    let mut backward = ResultSet::new();
    for (name, ms) in timings.iter().rev() {
        backward.record(result(name, *ms)).unwrap();
    }

    for preferred in ["basic", "missing"] {
        let b1 = Baseline::select(&forward, preferred).unwrap();
        let b2 = Baseline::select(&backward, preferred).unwrap();
        assert_eq!(b1, b2);
        for (name, _) in timings {
            assert_eq!(
                speedup(forward.get(name).unwrap(), &b1),
                speedup(backward.get(name).unwrap(), &b2)
            );
        }
    }
}

#[test]
fn test_result_names_are_unique() {
    let mut results = ResultSet::new();
    results.record(result("basic", 1)).unwrap();
    assert!(matches!(
        results.record(result("basic", 2)),
        Err(BenchError::DuplicateKernel(_))
    ));
    assert_eq!(results.get("basic").unwrap().elapsed(), Duration::from_millis(1));
}

#[test]
fn test_measure_records_size_and_description() {
    let registry = KernelRegistry::with_builtins().unwrap();
    let blocked = registry.lookup("blocked").unwrap();
    let (a, b) = Matrix::test_pair(32);

    let timing = measure(blocked, &a, &b, 32).unwrap();

    assert_eq!(timing.name(), "blocked");
    assert_eq!(timing.size(), 32);
    assert!(timing.description().contains("matrixmultiply_blocked_adaptive"));
}

// ============================================================
// Run orchestrator
// ============================================================

#[test]
fn test_run_preserves_order_and_verifies() {
    let config = RunConfig {
        size: 24,
        kernels: vec!["simd".into(), "basic".into(), "blocked".into()],
        ..RunConfig::default()
    };

    let report = BenchmarkRun::new(config).unwrap().run();

    assert_eq!(
        report.results.names().collect::<Vec<_>>(),
        ["simd", "basic", "blocked", "native", "ndarray"]
    );
    assert!(report.failures.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.verified.len(), 5);
    assert!(report.verified.values().all(|ok| *ok));
    assert_eq!(report.baseline.as_ref().unwrap().name, "basic");
}

#[test]
fn test_unregistered_kernel_is_skipped_not_failed() {
    let report = BenchmarkRun::new(quiet_config(8, &["basic", "strassen"])).unwrap().run();

    assert_eq!(report.skipped, ["strassen"]);
    assert!(report.failures.is_empty());
    assert!(report.results.get("basic").is_some());
    assert!(report.results.get("strassen").is_none());
}

#[test]
fn test_repeated_kernel_is_measured_once_and_reported() {
    let report = BenchmarkRun::new(quiet_config(8, &["basic", "simd", "basic"])).unwrap().run();

    assert_eq!(report.results.names().collect::<Vec<_>>(), ["basic", "simd"]);
    assert_eq!(report.skipped, ["basic"]);
    assert!(report.failures.is_empty());
}

#[test]
fn test_zero_size_run_produces_no_results() {
    let config = RunConfig {
        size: 0,
        ..RunConfig::default()
    };

    let report = BenchmarkRun::new(config).unwrap().run();

    assert!(report.results.is_empty());
    assert!(report.baseline.is_none());
    assert_eq!(report.failures.len(), 7);
    assert!(
        report
            .failures
            .iter()
            .all(|f| matches!(f.error, BenchError::InvalidDimension { size: 0 }))
    );
}

#[test]
fn test_failing_kernel_does_not_stop_the_run() {
    let mut builder = RegistryBuilder::new();
    builder.register_builtins().unwrap();
    builder
        .register("exploding", KernelEntry::new(exploding_kernel), KernelSignature::multiply())
        .unwrap();

    let config = quiet_config(8, &["basic", "exploding", "simd"]);
    let report = BenchmarkRun::from_registry(config, builder.build()).run();

    assert_eq!(report.results.names().collect::<Vec<_>>(), ["basic", "simd"]);
    assert!(report.failed("exploding"));
    assert!(matches!(
        report.failures[0].error,
        BenchError::KernelExecution { .. }
    ));
}

#[test]
fn test_missing_unit_is_skipped() {
    let mut config = quiet_config(8, &["basic"]);
    config.units.push(UnitSpec {
        name: "ghost".into(),
        path: "/nonexistent/libghost.so".into(),
        symbol: "matrixmultiply_ghost".into(),
        signature: "(int, int**, int**, int**) -> void".into(),
        profile: None,
    });

    let run = BenchmarkRun::new(config).unwrap();
    assert!(run.registry().lookup("ghost").is_none());
    let report = run.run();

    assert_eq!(report.skipped, ["ghost"]);
    assert!(report.failures.is_empty());
    assert_eq!(report.results.names().collect::<Vec<_>>(), ["basic"]);
}

#[test]
fn test_unit_with_bad_signature_is_reported() {
    let mut config = quiet_config(8, &["basic"]);
    config.units.push(UnitSpec {
        name: "floaty".into(),
        path: "/nonexistent/libfloaty.so".into(),
        symbol: "matrixmultiply_floaty".into(),
        signature: "(int, float**, float**, float**) -> void".into(),
        profile: None,
    });

    let report = BenchmarkRun::new(config).unwrap().run();

    assert!(report.skipped.is_empty());
    assert!(report.failed("floaty"));
    assert!(matches!(
        report.failures[0].error,
        BenchError::SignatureMismatch { .. }
    ));
}

#[test]
fn test_config_file_drives_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        size = 12
        kernels = ["blocked", "basic"]
        include_ndarray = false
        "#
    )
    .unwrap();

    let config = RunConfig::load(file.path()).unwrap();
    let report = BenchmarkRun::new(config).unwrap().run();

    assert_eq!(report.size, 12);
    assert_eq!(
        report.results.names().collect::<Vec<_>>(),
        ["blocked", "basic", "native"]
    );
}

#[test]
fn test_report_serializes_to_json() {
    let report = BenchmarkRun::new(quiet_config(4, &["basic", "nope"])).unwrap().run();

    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["size"], 4);
    assert!(json["results"]["basic"]["seconds"].is_number());
    assert_eq!(json["results"]["basic"]["size"], 4);
    assert_eq!(json["skipped"][0], "nope");
    assert_eq!(json["baseline"]["name"], "basic");
}

#[test]
fn test_write_json_reports_its_own_errors() {
    let report = BenchmarkRun::new(quiet_config(4, &["basic"])).unwrap().run();
    let dir = tempfile::tempdir().unwrap();

    let path = dir.path().join("report.json");
    write_json(&report, &path).unwrap();
    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["size"], 4);

    let missing = dir.path().join("no_such_dir").join("report.json");
    assert!(matches!(write_json(&report, &missing), Err(BenchError::Io(_))));

    let err: BenchError = serde_json::from_str::<u32>("not json").unwrap_err().into();
    assert!(matches!(err, BenchError::Report(_)));
}
