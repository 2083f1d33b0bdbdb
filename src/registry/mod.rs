//! Kernel registry.
//!
//! Populated once in a load phase through [`RegistryBuilder`], then frozen
//! into a [`KernelRegistry`] that only offers lookups. Every entry point's
//! declared shape is checked when it is registered, so a malformed kernel
//! never reaches the invoker.

pub mod loader;
pub mod signature;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use libloading::Library;
use tracing::debug;

use crate::bridge::{AllocationStats, CAllocator, CountingAllocator, ExternalAllocator};
use crate::error::{BenchError, Result};
use crate::kernels::{BUILTIN_KERNELS, BuiltinKernel, KernelFn};

pub use loader::{UnitAllocator, UnitSpec};
pub use signature::{KernelSignature, ValueKind};

/// Where a kernel's code lives.
#[derive(Clone)]
pub enum UnitOrigin {
    /// Compiled into this crate.
    Builtin,
    /// Loaded from a shared library, kept open while any descriptor refers to it.
    Library { path: PathBuf, library: Arc<Library> },
}

impl fmt::Debug for UnitOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOrigin::Builtin => f.write_str("Builtin"),
            UnitOrigin::Library { path, .. } => f.debug_tuple("Library").field(path).finish(),
        }
    }
}

/// Entry point plus everything needed to call it.
#[derive(Clone)]
pub struct KernelEntry {
    func: KernelFn,
    allocator: Arc<dyn ExternalAllocator>,
    origin: UnitOrigin,
    description: String,
}

impl KernelEntry {
    /// An in-process entry point using the C allocator.
    pub fn new(func: KernelFn) -> Self {
        Self {
            func,
            allocator: Arc::new(CAllocator),
            origin: UnitOrigin::Builtin,
            description: String::new(),
        }
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn ExternalAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub(crate) fn with_origin(mut self, origin: UnitOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// One registered kernel. Immutable once built.
#[derive(Clone)]
pub struct KernelDescriptor {
    name: String,
    func: KernelFn,
    signature: KernelSignature,
    description: String,
    allocator: Arc<CountingAllocator>,
    origin: UnitOrigin,
}

impl KernelDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn origin(&self) -> &UnitOrigin {
        &self.origin
    }

    /// The allocator external buffers for this kernel come from.
    pub fn allocator(&self) -> &CountingAllocator {
        &self.allocator
    }

    pub fn allocation_stats(&self) -> AllocationStats {
        self.allocator.stats()
    }

    pub(crate) fn entry_point(&self) -> KernelFn {
        self.func
    }
}

impl fmt::Debug for KernelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("description", &self.description)
            .field("allocator", &self.allocator)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Mutable load-phase view of the registry.
#[derive(Default)]
pub struct RegistryBuilder {
    kernels: IndexMap<String, KernelDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a descriptor after checking its declared shape.
    ///
    /// Fails with [`BenchError::SignatureMismatch`] if `signature` is not
    /// `(int, int**, int**, int**) -> void`, or
    /// [`BenchError::DuplicateKernel`] if `name` is taken.
    pub fn register(
        &mut self,
        name: &str,
        entry: KernelEntry,
        signature: KernelSignature,
    ) -> Result<KernelDescriptor> {
        check_signature(name, &signature)?;
        if self.kernels.contains_key(name) {
            return Err(BenchError::DuplicateKernel(name.to_string()));
        }

        let descriptor = KernelDescriptor {
            name: name.to_string(),
            func: entry.func,
            signature,
            description: entry.description,
            allocator: Arc::new(CountingAllocator::new(entry.allocator)),
            origin: entry.origin,
        };
        debug!(kernel = name, origin = ?descriptor.origin, "registered kernel");
        self.kernels.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Registers one of the in-tree kernels.
    pub fn register_builtin(&mut self, kernel: &BuiltinKernel) -> Result<KernelDescriptor> {
        let entry = KernelEntry::new(kernel.entry)
            .with_description(format!("{} ({})", kernel.description, kernel.symbol));
        self.register(kernel.name, entry, KernelSignature::multiply())
    }

    /// Registers all five in-tree kernels, in profile order.
    pub fn register_builtins(&mut self) -> Result<()> {
        for kernel in &BUILTIN_KERNELS {
            self.register_builtin(kernel)?;
        }
        Ok(())
    }

    /// Loads a shared-library unit and registers its entry point.
    ///
    /// A declared signature that does not parse counts as a mismatch.
    pub fn register_unit(&mut self, spec: &UnitSpec) -> Result<KernelDescriptor> {
        let signature: KernelSignature =
            spec.signature
                .parse()
                .map_err(|_| BenchError::SignatureMismatch {
                    name: spec.name.clone(),
                    expected: KernelSignature::multiply().to_string(),
                    found: spec.signature.clone(),
                })?;
        // Checked before the library is opened.
        check_signature(&spec.name, &signature)?;

        let entry = loader::load_unit(spec)?;
        self.register(&spec.name, entry, signature)
    }

    pub fn build(self) -> KernelRegistry {
        KernelRegistry {
            kernels: self.kernels,
        }
    }
}

/// Frozen kernel registry. Read-only, so it is shared without locking.
#[derive(Debug, Default, Clone)]
pub struct KernelRegistry {
    kernels: IndexMap<String, KernelDescriptor>,
}

impl KernelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry holding just the in-tree kernels.
    pub fn with_builtins() -> Result<Self> {
        let mut builder = Self::builder();
        builder.register_builtins()?;
        Ok(builder.build())
    }

    /// `None` means the kernel is unavailable and should be skipped.
    pub fn lookup(&self, name: &str) -> Option<&KernelDescriptor> {
        self.kernels.get(name)
    }

    /// Kernel names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelDescriptor> {
        self.kernels.values()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

fn check_signature(name: &str, signature: &KernelSignature) -> Result<()> {
    if signature.is_multiply() {
        return Ok(());
    }
    Err(BenchError::SignatureMismatch {
        name: name.to_string(),
        expected: KernelSignature::multiply().to_string(),
        found: signature.to_string(),
    })
}

pub(crate) fn display_path(path: &Path) -> String {
    path.display().to_string()
}
