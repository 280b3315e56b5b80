// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool-based heap: a fixed set of size-class free lists carved out of one
//! or more caller-provided arenas.
//!
//! Every scripting and bus allocation on a constrained target comes out of
//! these pools, so the allocator never touches the system heap after
//! [`Heap::init`]. Blocks are identified on free purely by address range;
//! each pool records where it ends and the first pool whose range contains
//! the address owns the block.

use tracing::{error, info};

use crate::error::{CoreError, CoreResult};

/// Pool sizes are rounded up to this alignment.
pub const POOL_ROUNDING: usize = 8;

/// A handle to an allocated block: `(arena index, byte offset)` packed into
/// one word. Offsets are arena-relative so handles stay valid if the arena
/// storage moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    arena: u8,
    offset: u32,
}

/// Compile-time description of one pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Block size in bytes (rounded up to [`POOL_ROUNDING`]).
    pub size: u32,
    /// Number of blocks in the pool.
    pub count: u16,
    /// Whether an allocation may be promoted to the next larger pool when
    /// this pool is exhausted.
    pub borrow: bool,
    /// Which arena backs this pool.
    pub arena: u8,
}

impl PoolConfig {
    pub const fn new(size: u32, count: u16) -> Self {
        Self { size, count, borrow: false, arena: 0 }
    }

    pub const fn borrowing(size: u32, count: u16) -> Self {
        Self { size, count, borrow: true, arena: 0 }
    }

    pub const fn on_arena(size: u32, count: u16, arena: u8) -> Self {
        Self { size, count, borrow: false, arena }
    }

    fn rounded(&self) -> usize {
        let sz = self.size as usize;
        sz + (POOL_ROUNDING - (sz & (POOL_ROUNDING - 1))) % POOL_ROUNDING
    }
}

/// Live state for one pool.
#[derive(Debug)]
struct Pool {
    /// Rounded block size.
    size: usize,
    /// Arena index this pool was carved from.
    arena: u8,
    /// Offset of the first block in the arena.
    base: usize,
    /// Offset one past the last block in the arena.
    end: usize,
    borrow: bool,
    /// Head of the free list; offsets of free blocks are chained through the
    /// first word of each block.
    free: Option<u32>,
    // Instrumentation.
    in_use: u16,
    hwm: u16,
    max_alloc: u32,
}

/// The pool heap. Owns its arenas as plain byte vectors.
#[derive(Debug)]
pub struct Heap {
    arenas: Vec<Vec<u8>>,
    pools: Vec<Pool>,
}

/// Pool layout used by the host runtime: a spread of small script-object
/// classes with borrowing enabled where exhaustion is survivable, plus a
/// few large blocks for staging buffers.
pub fn default_pool_config() -> Vec<PoolConfig> {
    vec![
        PoolConfig::borrowing(16, 200),
        PoolConfig::borrowing(24, 800),
        PoolConfig::borrowing(32, 800),
        PoolConfig::borrowing(48, 800),
        PoolConfig::borrowing(64, 300),
        PoolConfig::borrowing(96, 300),
        PoolConfig::borrowing(128, 150),
        PoolConfig::borrowing(256, 60),
        PoolConfig::borrowing(512, 20),
        PoolConfig::borrowing(1024, 10),
        PoolConfig::new(2048, 4),
    ]
}

/// Bytes required to back `config` on the given arena, analogous to sizing
/// a static buffer at compile time.
pub fn heap_required(config: &[PoolConfig], arena: u8) -> usize {
    config
        .iter()
        .filter(|p| p.arena == arena)
        .map(|p| p.rounded() * p.count as usize)
        .sum()
}

fn read_word(arena: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&arena[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

fn write_word(arena: &mut [u8], offset: usize, word: u32) {
    arena[offset..offset + 4].copy_from_slice(&word.to_ne_bytes());
}

/// Sentinel stored in a free block whose `next` chain ends.
const FREE_END: u32 = u32::MAX;

impl Heap {
    /// Carve the pools described by `config` out of freshly-allocated arenas.
    ///
    /// Pool sizes must be strictly ascending; every block of every pool is
    /// threaded onto its pool's free list.
    pub fn init(config: &[PoolConfig]) -> CoreResult<Self> {
        let num_arenas =
            config.iter().map(|p| p.arena as usize + 1).max().unwrap_or(1);
        let mut arenas: Vec<Vec<u8>> = Vec::with_capacity(num_arenas);
        for a in 0..num_arenas {
            arenas.push(vec![0u8; heap_required(config, a as u8)]);
        }

        let mut pools = Vec::with_capacity(config.len());
        let mut cursor = vec![0usize; num_arenas];
        let mut prev_size = 0usize;
        for cfg in config {
            let size = cfg.rounded();
            if size <= prev_size {
                error!(size, "pool sizes must be strictly ascending");
                return Err(CoreError::Invalid);
            }
            prev_size = size;
            let arena_idx = cfg.arena as usize;
            let base = cursor[arena_idx];
            let end = base + size * cfg.count as usize;
            if end > arenas[arena_idx].len() {
                error!("arena too small for the requested pool allocations");
                return Err(CoreError::Resources);
            }
            cursor[arena_idx] = end;

            let mut pool = Pool {
                size,
                arena: cfg.arena,
                base,
                end,
                borrow: cfg.borrow,
                free: None,
                in_use: 0,
                hwm: 0,
                max_alloc: 0,
            };
            // Thread every block onto the free list.
            let arena = &mut arenas[arena_idx];
            for n in 0..cfg.count as usize {
                let offset = base + n * size;
                let next = pool.free.unwrap_or(FREE_END);
                write_word(arena, offset, next);
                pool.free = Some(offset as u32);
            }
            pools.push(pool);
        }
        Ok(Self { arenas, pools })
    }

    /// Allocate `size` bytes from the best-fit pool.
    ///
    /// Scans pools in ascending size order; an exhausted pool either fails
    /// the allocation or, when flagged `borrow`, defers to the next larger
    /// pool. `alloc(0)` returns `None` without touching any pool.
    pub fn alloc(&mut self, size: usize) -> Option<Block> {
        if size == 0 {
            return None;
        }
        for i in 0..self.pools.len() {
            if size > self.pools[i].size {
                continue;
            }
            match self.pools[i].free {
                Some(offset) => {
                    let next = read_word(&self.arenas[self.pools[i].arena as usize], offset as usize);
                    let pool = &mut self.pools[i];
                    pool.free = if next == FREE_END { None } else { Some(next) };
                    pool.in_use += 1;
                    pool.hwm = pool.hwm.max(pool.in_use);
                    pool.max_alloc = pool.max_alloc.max(size as u32);
                    return Some(Block { arena: pool.arena, offset });
                }
                None => {
                    if self.pools[i].borrow {
                        continue;
                    }
                    break;
                }
            }
        }
        error!(size, "pool alloc failed");
        self.dump();
        None
    }

    /// Resize a block.
    ///
    /// The same block is returned when the new size still fits its current
    /// pool and would not fit the previous smaller pool. Otherwise a new
    /// block is allocated, `min(old, new)` bytes are copied and the original
    /// is freed.
    pub fn realloc(&mut self, block: Block, new_size: usize) -> Option<Block> {
        let idx = self.owner(block)?;
        let old_size = self.pools[idx].size;
        let fits_here = new_size <= old_size;
        let fits_smaller = idx > 0 && new_size <= self.pools[idx - 1].size;
        if fits_here && !fits_smaller {
            return Some(block);
        }
        let moved = self.alloc(new_size)?;
        let copy = old_size.min(new_size);
        let src_start = block.offset as usize;
        if block.arena == moved.arena {
            let arena = &mut self.arenas[block.arena as usize];
            let dst_start = moved.offset as usize;
            arena.copy_within(src_start..src_start + copy, dst_start);
        } else {
            let (src, dst) = split_arenas(&mut self.arenas, block.arena as usize, moved.arena as usize);
            dst[moved.offset as usize..moved.offset as usize + copy]
                .copy_from_slice(&src[src_start..src_start + copy]);
        }
        self.free(block);
        Some(moved)
    }

    /// Return a block to the pool that owns its address range.
    ///
    /// Panics if the address lies outside every pool; that is a caller bug
    /// equivalent to freeing a wild pointer.
    pub fn free(&mut self, block: Block) {
        let idx = self.owner(block);
        assert!(idx.is_some(), "free of address outside all pools");
        if let Some(idx) = idx {
            let next = self.pools[idx].free.unwrap_or(FREE_END);
            write_word(
                &mut self.arenas[self.pools[idx].arena as usize],
                block.offset as usize,
                next,
            );
            let pool = &mut self.pools[idx];
            pool.free = Some(block.offset);
            pool.in_use = pool.in_use.saturating_sub(1);
        }
    }

    /// Borrow the payload of a live block.
    pub fn bytes(&self, block: Block) -> &[u8] {
        let size = self.owner(block).map(|i| self.pools[i].size).unwrap_or(0);
        let start = block.offset as usize;
        &self.arenas[block.arena as usize][start..start + size]
    }

    /// Mutably borrow the payload of a live block.
    pub fn bytes_mut(&mut self, block: Block) -> &mut [u8] {
        let size = self.owner(block).map(|i| self.pools[i].size).unwrap_or(0);
        let start = block.offset as usize;
        &mut self.arenas[block.arena as usize][start..start + size]
    }

    /// Size class of the pool owning `block`.
    pub fn block_size(&self, block: Block) -> Option<usize> {
        self.owner(block).map(|i| self.pools[i].size)
    }

    /// Index of the pool whose address range contains `block`.
    fn owner(&self, block: Block) -> Option<usize> {
        self.pools.iter().position(|p| {
            p.arena == block.arena
                && (block.offset as usize) >= p.base
                && (block.offset as usize) < p.end
        })
    }

    /// Log a usage summary of every pool.
    pub fn dump(&self) {
        let mut use_total = 0usize;
        let mut high_total = 0usize;
        for p in &self.pools {
            info!(
                size = p.size,
                used = p.in_use,
                free = (p.end - p.base) / p.size - p.in_use as usize,
                hwm = p.hwm,
                max_alloc = p.max_alloc,
                "pool"
            );
            use_total += p.in_use as usize * p.size;
            high_total += p.hwm as usize * p.size;
        }
        info!(use_total, high_total, "heap");
    }

    /// Number of blocks currently allocated across all pools.
    pub fn blocks_in_use(&self) -> usize {
        self.pools.iter().map(|p| p.in_use as usize).sum()
    }
}

/// Borrow two distinct arenas mutably.
fn split_arenas(arenas: &mut [Vec<u8>], src: usize, dst: usize) -> (&[u8], &mut [u8]) {
    debug_assert_ne!(src, dst);
    if src < dst {
        let (a, b) = arenas.split_at_mut(dst);
        (a[src].as_slice(), b[0].as_mut_slice())
    } else {
        let (a, b) = arenas.split_at_mut(src);
        (b[0].as_slice(), a[dst].as_mut_slice())
    }
}

#[cfg(test)]
#[path = "heap_tests.rs"]
mod tests;
