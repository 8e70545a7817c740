//! Linear-memory snapshot engine — block-hashed incremental snapshots with
//! stacked checkpoints and cheap rollback.
//!
//! Grounded on the block-size default, BLAKE2b-16 block hashing, and
//! direct-to-guest-memory restore/rollback behavior of the Python
//! reference snapshot module, reimplemented with an owned base image and
//! per-checkpoint dirty-block maps instead of NumPy array views.

use std::collections::HashMap;

use pybox_primitives::{hash::hash_block, BlockDigest};

use crate::error::SandboxError;

/// One captured delta: the set of blocks that changed since the previous
/// checkpoint (or the base image, for the first checkpoint).
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: Option<String>,
    pub dirty_blocks: HashMap<u32, Vec<u8>>,
    pub memory_size: usize,
    pub dirty_count: usize,
}

impl Checkpoint {
    /// Bytes held by this checkpoint's dirty-block set.
    pub fn memory_usage(&self) -> usize {
        self.dirty_blocks.values().map(Vec::len).sum()
    }
}

/// Aggregate statistics matching the field set the Python reference
/// implementation's `get_stats()` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStats {
    pub base_memory_size: usize,
    pub block_size: usize,
    pub total_blocks: usize,
    pub num_checkpoints: usize,
    pub total_dirty_blocks: usize,
    pub checkpoint_memory_usage: usize,
    pub avg_dirty_blocks_per_checkpoint: f64,
}

/// Block-hashed copy-on-write snapshot engine over one guest's linear
/// memory.
pub struct SnapshotEngine {
    block_size: usize,
    base_memory: Option<Vec<u8>>,
    block_hashes: Vec<BlockDigest>,
    checkpoints: Vec<Checkpoint>,
}

impl SnapshotEngine {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            base_memory: None,
            block_hashes: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn has_base(&self) -> bool {
        self.base_memory.is_some()
    }

    /// Capture the base image. Must be called exactly once, before any
    /// `capture_delta`/`restore`/`rollback` call; a second call fails with
    /// `ValidationError` rather than silently re-basing.
    pub fn capture_base(&mut self, memory: &[u8]) -> Result<usize, SandboxError> {
        if self.base_memory.is_some() {
            return Err(SandboxError::ValidationError(
                "snapshot engine already has a base image".into(),
            ));
        }
        self.base_memory = Some(memory.to_vec());
        self.recompute_block_hashes();
        tracing::debug!(memory_size = memory.len(), "captured snapshot base image");
        Ok(memory.len())
    }

    fn recompute_block_hashes(&mut self) {
        let base = self.base_memory.as_ref().expect("base captured");
        self.block_hashes = base.chunks(self.block_size).map(hash_block).collect();
    }

    /// Detect dirty blocks since the last checkpoint (or the base image)
    /// and push a new checkpoint. Returns `(dirty_count, bytes_held)`.
    ///
    /// Growth beyond the base image's current size is handled by zero-
    /// extending the base and hashing the newly appeared blocks — those
    /// blocks are not marked dirty by the growth itself, only by whatever
    /// a later call finds changed inside them.
    pub fn capture_delta(
        &mut self,
        memory: &[u8],
        checkpoint_name: Option<String>,
    ) -> Result<(usize, usize), SandboxError> {
        if !self.has_base() {
            return Err(SandboxError::ValidationError(
                "snapshot engine has no base image".into(),
            ));
        }
        self.maybe_expand_base(memory.len());

        let mut dirty_blocks = HashMap::new();
        for (idx, block) in memory.chunks(self.block_size).enumerate() {
            let digest = hash_block(block);
            if self.block_hashes.get(idx) != Some(&digest) {
                dirty_blocks.insert(idx as u32, block.to_vec());
            }
        }

        let dirty_count = dirty_blocks.len();
        let checkpoint = Checkpoint {
            name: checkpoint_name,
            dirty_blocks,
            memory_size: memory.len(),
            dirty_count,
        };
        let bytes_held = checkpoint.memory_usage();
        self.checkpoints.push(checkpoint);
        tracing::debug!(dirty_count, bytes_held, "captured snapshot delta");
        Ok((dirty_count, bytes_held))
    }

    fn maybe_expand_base(&mut self, new_len: usize) {
        let base = self.base_memory.as_mut().expect("base captured");
        if new_len <= base.len() {
            return;
        }
        let old_block_count = self.block_hashes.len();
        base.resize(new_len, 0);
        let new_block_count = base.len().div_ceil(self.block_size);
        for idx in old_block_count..new_block_count {
            let start = idx * self.block_size;
            let end = (start + self.block_size).min(base.len());
            self.block_hashes.push(hash_block(&base[start..end]));
        }
    }

    /// Write the base image followed by checkpoints `0..=checkpoint_index`
    /// directly into `memory`, Python-style negative indexing (`-1` means
    /// the most recent checkpoint). `memory` must already be sized to at
    /// least the base image's length.
    pub fn restore(&self, memory: &mut [u8], checkpoint_index: i64) -> Result<(), SandboxError> {
        let base = self
            .base_memory
            .as_ref()
            .ok_or_else(|| SandboxError::ValidationError("snapshot engine has no base image".into()))?;

        let len = self.checkpoints.len() as i64;
        let resolved = if checkpoint_index < 0 {
            len + checkpoint_index
        } else {
            checkpoint_index
        };
        if resolved >= len || resolved < -1 {
            return Err(SandboxError::CheckpointOutOfRange(
                checkpoint_index,
                self.checkpoints.len(),
            ));
        }

        if memory.len() < base.len() {
            return Err(SandboxError::MemoryError(
                "guest memory smaller than snapshot base image".into(),
            ));
        }
        memory[..base.len()].copy_from_slice(base);

        if resolved >= 0 {
            for checkpoint in &self.checkpoints[..=(resolved as usize)] {
                for (&block_idx, bytes) in &checkpoint.dirty_blocks {
                    let start = block_idx as usize * self.block_size;
                    let end = start + bytes.len();
                    if end > memory.len() {
                        return Err(SandboxError::MemoryError(
                            "checkpoint block falls outside guest memory".into(),
                        ));
                    }
                    memory[start..end].copy_from_slice(bytes);
                }
            }
        }

        tracing::trace!(checkpoint_index, "restored guest memory");
        Ok(())
    }

    /// Convenience for `restore(mem, len(checkpoints) - steps - 1)`, clamped
    /// so that `steps >= len(checkpoints)` restores to the base image. Does
    /// not drop any checkpoints — the stack is left intact, so a later
    /// `restore`/`rollback` can still reach checkpoints "above" this one.
    pub fn rollback(&self, memory: &mut [u8], steps: usize) -> Result<(), SandboxError> {
        let len = self.checkpoints.len();
        let index = if steps >= len {
            -1
        } else {
            (len - steps - 1) as i64
        };
        tracing::trace!(steps, resolved_index = index, "rolling back guest memory");
        self.restore(memory, index)
    }

    pub fn clear_checkpoints(&mut self) {
        self.checkpoints.clear();
    }

    pub fn stats(&self) -> SnapshotStats {
        let total_dirty_blocks: usize = self.checkpoints.iter().map(|c| c.dirty_count).sum();
        let checkpoint_memory_usage: usize = self.checkpoints.iter().map(Checkpoint::memory_usage).sum();
        let avg_dirty_blocks_per_checkpoint = if self.checkpoints.is_empty() {
            0.0
        } else {
            total_dirty_blocks as f64 / self.checkpoints.len() as f64
        };
        SnapshotStats {
            base_memory_size: self.base_memory.as_ref().map_or(0, Vec::len),
            block_size: self.block_size,
            total_blocks: self.block_hashes.len(),
            num_checkpoints: self.checkpoints.len(),
            total_dirty_blocks,
            checkpoint_memory_usage,
            avg_dirty_blocks_per_checkpoint,
        }
    }
}
