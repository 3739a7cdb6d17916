//! Configuration types for sandbox instances.

use crate::error::{Result, VmError};
use std::time::Duration;

/// Size of one guest linear-memory page in bytes.
pub const PAGE_SIZE: u64 = 65_536;

/// Platform-wide ceiling on guest memory, in pages (1 GiB).
pub const MAX_MEMORY_PAGES: u32 = 16_384;

/// Interval at which the engine epoch advances.
pub const DEFAULT_EPOCH_TICK: Duration = Duration::from_millis(10);

/// Default maximum guest stack size in bytes.
pub const DEFAULT_MAX_WASM_STACK: usize = 512 * 1024;

/// Convert a declared memory size into a page ceiling.
///
/// Rounds up to whole pages and caps at [`MAX_MEMORY_PAGES`] with a warning. A
/// declared size of zero means no ceiling was declared and yields the maximum.
pub fn memory_limit_pages(memory_bytes: u64) -> u32 {
    if memory_bytes == 0 {
        return MAX_MEMORY_PAGES;
    }

    let mut pages = memory_bytes / PAGE_SIZE;
    if memory_bytes % PAGE_SIZE != 0 {
        pages += 1;
    }

    if pages > u64::from(MAX_MEMORY_PAGES) {
        tracing::warn!(
            requested_pages = pages,
            max_pages = MAX_MEMORY_PAGES,
            "Memory request above platform maximum, clamping"
        );
        return MAX_MEMORY_PAGES;
    }

    pages as u32
}

/// Engine-level settings shared by every instance a service boots.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How often the epoch ticker advances (default: 10ms).
    pub epoch_tick: Duration,
    /// Maximum guest stack size in bytes (default: 512 KiB).
    pub max_wasm_stack: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            epoch_tick: DEFAULT_EPOCH_TICK,
            max_wasm_stack: DEFAULT_MAX_WASM_STACK,
        }
    }
}

impl ServiceConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.epoch_tick.is_zero() {
            return Err(VmError::Config("epoch_tick must be > 0".into()));
        }
        if self.max_wasm_stack == 0 {
            return Err(VmError::Config("max_wasm_stack must be > 0".into()));
        }
        Ok(())
    }

    /// Build the wasmtime configuration for a fresh engine.
    pub(crate) fn engine_config(&self) -> wasmtime::Config {
        let mut config = wasmtime::Config::new();
        config
            .async_support(true)
            .epoch_interruption(true)
            .max_wasm_stack(self.max_wasm_stack);
        config
    }
}

/// Per-instance sandbox configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Memory ceiling in pages (default: [`MAX_MEMORY_PAGES`]).
    pub memory_pages: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_pages: MAX_MEMORY_PAGES,
        }
    }
}

impl SandboxConfig {
    /// Build a config from a declared memory size in bytes.
    pub fn from_memory_bytes(memory_bytes: u64) -> Self {
        Self {
            memory_pages: memory_limit_pages(memory_bytes),
        }
    }

    /// Memory ceiling in bytes.
    pub fn memory_bytes(&self) -> u64 {
        u64::from(self.memory_pages) * PAGE_SIZE
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.memory_pages == 0 {
            return Err("memory_pages must be > 0".into());
        }
        if self.memory_pages > MAX_MEMORY_PAGES {
            return Err(format!(
                "memory_pages must be <= {MAX_MEMORY_PAGES}, got {}",
                self.memory_pages
            ));
        }
        Ok(())
    }
}
