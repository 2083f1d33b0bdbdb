//! Loading kernel units from shared libraries.

use std::path::PathBuf;
use std::sync::Arc;

use libc::c_int;
use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{KernelEntry, UnitOrigin, display_path};
use crate::bridge::{self, ExternalAllocator, ExternalMatrix, RowTable};
use crate::error::{BenchError, Result};
use crate::kernels::{CreateMatrixFn, FreeMatrixFn, InitMatricesFn, KernelFn, OptimizationProfile};
use crate::matrix::Matrix;

fn default_signature() -> String {
    "(int, int**, int**, int**) -> void".to_string()
}

/// One shared-library kernel listed in the run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    pub path: PathBuf,
    /// Entry point symbol, e.g. `matrixmultiply_blocked_adaptive`.
    pub symbol: String,
    #[serde(default = "default_signature")]
    pub signature: String,
    #[serde(default)]
    pub profile: Option<OptimizationProfile>,
}

/// Allocator backed by a unit's own `create_matrix`/`free_matrix` pair.
pub struct UnitAllocator {
    create: CreateMatrixFn,
    free: FreeMatrixFn,
    // Keeps the two function pointers valid.
    _library: Option<Arc<Library>>,
}

impl UnitAllocator {
    /// Wraps an allocation pair that lives in this process.
    ///
    /// # Safety
    ///
    /// `create(n)` must return null or a table of `n` row pointers, each null
    /// or pointing to `n` writable `c_int`s. `free(table, n)` must release
    /// anything `create(n)` returned, null rows included.
    pub unsafe fn new(create: CreateMatrixFn, free: FreeMatrixFn) -> Self {
        Self {
            create,
            free,
            _library: None,
        }
    }

    fn from_library(create: CreateMatrixFn, free: FreeMatrixFn, library: Arc<Library>) -> Self {
        Self {
            create,
            free,
            _library: Some(library),
        }
    }
}

// SAFETY: tables with a null row are handed back and reported as
// allocation failures, so every table returned has `size` live rows.
unsafe impl ExternalAllocator for UnitAllocator {
    fn allocate(&self, size: usize) -> Result<RowTable> {
        let n = c_int::try_from(size)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(BenchError::InvalidDimension { size })?;
        // SAFETY: `create_matrix` takes a positive size and returns a table or null.
        let raw = unsafe { (self.create)(n) };
        // SAFETY: non-null tables from `create_matrix` stay valid until `free_matrix`.
        let table = unsafe { RowTable::from_raw(raw) }.ok_or(BenchError::Allocation { size })?;

        // `create_matrix` does not check its row allocations.
        // SAFETY: the table holds `size` row pointers.
        let rows = unsafe { std::slice::from_raw_parts(table.as_ptr(), size) };
        if rows.iter().any(|row| row.is_null()) {
            warn!(allocator = "unit", size, "create_matrix returned a table with a null row");
            // SAFETY: `free_matrix` accepts the table as returned, null rows included.
            unsafe { (self.free)(table.as_ptr(), n) };
            return Err(BenchError::Allocation { size });
        }
        Ok(table)
    }

    unsafe fn deallocate(&self, table: RowTable, size: usize) {
        // `allocate` only succeeds for sizes that fit in c_int.
        let n = size as c_int;
        // SAFETY: caller guarantees the table came from `allocate(size)`.
        unsafe { (self.free)(table.as_ptr(), n) };
    }

    fn name(&self) -> &str {
        "unit"
    }
}

/// Opens a unit and resolves its entry point and optional helpers.
///
/// Fails with [`BenchError::UnitLoad`] if the library cannot be opened or
/// the entry symbol is missing.
pub fn load_unit(spec: &UnitSpec) -> Result<KernelEntry> {
    let load_err = |source| BenchError::UnitLoad {
        name: spec.name.clone(),
        path: display_path(&spec.path),
        source,
    };

    // SAFETY: loading runs the library's initialisers. Units are trusted
    // benchmark code named explicitly in the configuration.
    let library = Arc::new(unsafe { Library::new(&spec.path) }.map_err(load_err)?);

    // SAFETY: the declared signature was checked against `KernelFn` before
    // loading; the pointer is only used while `library` is alive.
    let func: KernelFn = unsafe {
        let symbol: Symbol<KernelFn> = library.get(spec.symbol.as_bytes()).map_err(load_err)?;
        *symbol
    };

    let create = unsafe { library.get::<CreateMatrixFn>(b"create_matrix") }.ok().map(|s| *s);
    let free = unsafe { library.get::<FreeMatrixFn>(b"free_matrix") }.ok().map(|s| *s);
    let init = unsafe { library.get::<InitMatricesFn>(b"init_test_matrices") }.ok().map(|s| *s);

    let allocator: Arc<dyn ExternalAllocator> = match (create, free) {
        (Some(create), Some(free)) => {
            debug!(unit = %spec.name, "using the unit's create_matrix/free_matrix");
            Arc::new(UnitAllocator::from_library(create, free, Arc::clone(&library)))
        }
        _ => Arc::new(bridge::CAllocator),
    };

    if let Some(init) = init {
        check_test_inputs(&spec.name, init, allocator.as_ref());
    }

    let description = match spec.profile {
        Some(profile) => format!(
            "{} from {} ({})",
            spec.symbol,
            display_path(&spec.path),
            profile.compiler_flags().join(" ")
        ),
        None => format!("{} from {}", spec.symbol, display_path(&spec.path)),
    };

    info!(unit = %spec.name, path = %display_path(&spec.path), "loaded kernel unit");

    Ok(KernelEntry::new(func)
        .with_allocator(allocator)
        .with_description(description)
        .with_origin(UnitOrigin::Library {
            path: spec.path.clone(),
            library,
        }))
}

/// Size used to compare a unit's input generator with the host's.
const INIT_CHECK_SIZE: usize = 4;

/// Compares the unit's `init_test_matrices` against [`Matrix::test_pair`].
///
/// A disagreement is only logged; inputs always come from the host.
fn check_test_inputs(name: &str, init: InitMatricesFn, allocator: &dyn ExternalAllocator) {
    let n = INIT_CHECK_SIZE;
    let (Ok(a), Ok(b)) = (
        ExternalMatrix::zeroed(allocator, n),
        ExternalMatrix::zeroed(allocator, n),
    ) else {
        warn!(unit = name, "could not allocate buffers to check init_test_matrices");
        return;
    };

    // SAFETY: both tables hold `n` rows of `n` elements.
    unsafe { init(n as c_int, a.as_raw(), b.as_raw()) };

    let (expected_a, expected_b) = Matrix::test_pair(n);
    let agrees = matches!(bridge::to_native(&a, n), Ok(m) if m == expected_a)
        && matches!(bridge::to_native(&b, n), Ok(m) if m == expected_b);
    if !agrees {
        warn!(unit = name, "init_test_matrices disagrees with the host input generator");
    }
}
