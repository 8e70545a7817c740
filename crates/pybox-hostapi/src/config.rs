//! Resource limits and filesystem exposure for one engine instance.

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for one [`pybox_sandbox::Sandbox`]/engine instance.
///
/// Mirrors the sandbox crate's own config struct in shape (a plain struct
/// of limits with a `Default` impl), adapted to this engine's concerns:
/// block size for the snapshot engine instead of gas/event limits, and
/// preopened directories instead of a deterministic-execution flag set.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum guest linear memory, in 64 KiB wasm pages.
    pub max_memory_pages: u32,
    /// Fuel budget charged per `exec` call; `None` disables fuel metering.
    pub fuel_limit: Option<u64>,
    /// Block size used by the snapshot engine, in bytes. Must be a power
    /// of two; the reference default is 16 KiB.
    pub block_size: usize,
    /// Guest path -> host path directory mappings exposed via WASI.
    pub preopened_dirs: HashMap<String, PathBuf>,
    /// Whether the guest's debug log host call is honored.
    pub enable_guest_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 4096, // 256 MiB
            fuel_limit: Some(10_000_000_000),
            block_size: 16 * 1024,
            preopened_dirs: HashMap::new(),
            enable_guest_logs: true,
        }
    }
}

impl EngineConfig {
    pub fn with_preopened_dir(mut self, guest_path: impl Into<String>, host_path: impl Into<PathBuf>) -> Self {
        self.preopened_dirs.insert(guest_path.into(), host_path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_block_size_is_16kib() {
        assert_eq!(EngineConfig::default().block_size, 16 * 1024);
    }

    #[test]
    fn with_preopened_dir_accumulates() {
        let cfg = EngineConfig::default()
            .with_preopened_dir("/", "/tmp/sandbox-root")
            .with_preopened_dir("/data", "/tmp/sandbox-data");
        assert_eq!(cfg.preopened_dirs.len(), 2);
        assert_eq!(
            cfg.preopened_dirs.get("/").unwrap(),
            &PathBuf::from("/tmp/sandbox-root")
        );
    }
}
