//! # Runtime Configuration Module
//!
//! Environment variable-based configuration for routeforge's runtime behavior.
//!
//! ## Environment Variables
//!
//! ### `ROUTEFORGE_STACK_SIZE`
//!
//! Stack size for spawned coroutines (discovery loads, registrar module
//! loads, manual registry callbacks). Accepts decimal (`16384`) or
//! hexadecimal (`0x4000`) values. Default: `0x4000` (16 KB).
//!
//! ### `ROUTEFORGE_CHUNK_SIZE`
//!
//! Number of files per discovery chunk. Files within a chunk are loaded in
//! parallel coroutines. Default: `16`.
//!
//! ### `ROUTEFORGE_MAX_CONCURRENCY`
//!
//! Upper bound on concurrent registration callbacks inside one manual
//! registry priority tier. Default: host parallelism.
//!
//! ## Usage
//!
//! ```rust
//! use routeforge::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use std::env;

/// Runtime configuration loaded from environment variables.
///
/// Load this once at startup using [`RuntimeConfig::from_env()`]; every
/// component that spawns coroutines takes a copy.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 16 KB / 0x4000)
    pub stack_size: usize,
    /// Discovery chunk size in files (default: 16)
    pub chunk_size: usize,
    /// Bounded concurrency inside one registry priority tier
    /// (default: host parallelism)
    pub max_concurrency: usize,
}

fn parse_size(val: &str) -> Option<usize> {
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = env::var("ROUTEFORGE_STACK_SIZE")
            .ok()
            .and_then(|v| parse_size(&v))
            .unwrap_or(0x4000);

        let chunk_size = env::var("ROUTEFORGE_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(16);

        let max_concurrency = env::var("ROUTEFORGE_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(host_parallelism);

        Self {
            stack_size,
            chunk_size,
            max_concurrency,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: 0x4000,
            chunk_size: 16,
            max_concurrency: host_parallelism(),
        }
    }
}
