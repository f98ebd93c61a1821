//! Chunked bump arena for build scratch memory
//!
//! Memory is carved from fixed-size byte chunks. Allocation bumps a cursor
//! inside the current chunk and moves to the next chunk (allocating it if
//! needed) when the request does not fit. Nothing is freed individually:
//! [`Arena::reset`] rewinds to the first chunk and keeps every chunk for
//! reuse, [`Arena::destroy`] releases them all.
//!
//! Allocations are returned as [`ArenaBlock`] handles and read back through
//! the arena, so no pointer into a chunk outlives a borrow of the arena.

use crate::errors::{DtreeError, Result};
use tracing::{debug, trace};

/// Chunk size used by [`Arena::default`]
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Location of one allocation inside an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaBlock {
    chunk: usize,
    offset: usize,
    len: usize,
}

impl ArenaBlock {
    /// Index of the chunk holding the block
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Byte offset of the block inside its chunk
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bump allocator over a growing list of fixed-size chunks
#[derive(Debug)]
pub struct Arena {
    chunks: Vec<Box<[u8]>>,
    chunk_size: usize,
    /// Chunk allocations come from, `None` before the first allocation
    current: Option<usize>,
    /// Next free byte in the current chunk
    cursor: usize,
}

impl Arena {
    /// Create an empty arena whose chunks hold `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DtreeError::InvalidArgument(
                "arena chunk size must be positive".to_string(),
            ));
        }
        Ok(Self {
            chunks: Vec::new(),
            chunk_size,
            current: None,
            cursor: 0,
        })
    }

    /// Largest single allocation the arena accepts
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently owned
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk allocations currently come from
    pub fn current_chunk(&self) -> Option<usize> {
        self.current
    }

    /// Bytes handed out from the current chunk
    pub fn used_in_current(&self) -> usize {
        if self.current.is_some() {
            self.cursor
        } else {
            0
        }
    }

    /// Allocate the first chunk ahead of use without making it current
    pub fn preallocate(&mut self) -> Result<()> {
        if self.chunks.is_empty() {
            self.push_chunk()?;
        }
        Ok(())
    }

    /// Allocate `n_bytes` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n_bytes` exceeds the chunk size.
    pub fn alloc(&mut self, n_bytes: usize) -> Result<ArenaBlock> {
        assert!(
            n_bytes <= self.chunk_size,
            "arena request of {n_bytes} bytes exceeds chunk size {}",
            self.chunk_size
        );

        let fits = self.current.is_some()
            && self
                .cursor
                .checked_add(n_bytes)
                .is_some_and(|end| end <= self.chunk_size);

        if !fits {
            let next = self.current.map_or(0, |chunk| chunk + 1);
            if next >= self.chunks.len() {
                self.push_chunk()?;
            }
            self.current = Some(next);
            self.cursor = 0;
        }

        let chunk = self.current.unwrap_or(0);
        let block = ArenaBlock {
            chunk,
            offset: self.cursor,
            len: n_bytes,
        };
        self.cursor += n_bytes;
        trace!(chunk, offset = block.offset, len = n_bytes, "arena alloc");
        Ok(block)
    }

    /// Allocate a block and copy `data` into it
    pub fn alloc_copy(&mut self, data: &[u8]) -> Result<ArenaBlock> {
        let block = self.alloc(data.len())?;
        if let Some(bytes) = self.bytes_mut(block) {
            bytes.copy_from_slice(data);
        }
        Ok(block)
    }

    /// Bytes of `block`, `None` if the block no longer lies inside the arena
    pub fn bytes(&self, block: ArenaBlock) -> Option<&[u8]> {
        self.chunks
            .get(block.chunk)?
            .get(block.offset..block.offset.checked_add(block.len)?)
    }

    /// Mutable bytes of `block`, `None` if the block no longer lies inside the arena
    pub fn bytes_mut(&mut self, block: ArenaBlock) -> Option<&mut [u8]> {
        self.chunks
            .get_mut(block.chunk)?
            .get_mut(block.offset..block.offset.checked_add(block.len)?)
    }

    /// Rewind to the start of the first chunk, keeping all chunks.
    ///
    /// Previously written bytes are left in place.
    pub fn reset(&mut self) {
        self.current = None;
        self.cursor = 0;
        debug!(chunks = self.chunks.len(), "arena reset");
    }

    /// Release every chunk and return to the initial empty state
    pub fn destroy(&mut self) {
        let released = self.chunks.len();
        self.chunks = Vec::new();
        self.current = None;
        self.cursor = 0;
        debug!(chunks = released, "arena destroyed");
    }

    fn push_chunk(&mut self) -> Result<()> {
        let bytes = self.chunk_size;
        let mut chunk = Vec::new();
        chunk
            .try_reserve_exact(bytes)
            .map_err(|_| DtreeError::AllocationFailure { bytes })?;
        chunk.resize(bytes, 0u8);
        self.chunks
            .try_reserve(1)
            .map_err(|_| DtreeError::AllocationFailure {
                bytes: std::mem::size_of::<Box<[u8]>>(),
            })?;
        self.chunks.push(chunk.into_boxed_slice());
        debug!(chunk = self.chunks.len() - 1, bytes, "arena chunk allocated");
        Ok(())
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            current: None,
            cursor: 0,
        }
    }
}
