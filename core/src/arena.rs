use std::ptr;

/// Size of one reusable chunk, in bytes.
const CHUNK_SIZE: usize = 32 * 1024;
const CHUNK_WORDS: usize = CHUNK_SIZE / 8;

/// Per-TB bump allocator.
///
/// Scratch memory for one translation (liveness state vectors, shadow-temp
/// maps) comes out of a chain of fixed-size chunks. The chunks survive
/// `reset` and are simply re-bumped from the start for the next TB;
/// allocations larger than a chunk go on a separate list that is freed
/// wholesale on reset. There is no individual free.
///
/// Chunks are backed by `u64` words so every allocation is 8-aligned, and
/// the boxed storage never moves once created, so pointers handed out stay
/// valid until the next `reset`.
pub struct Arena {
    chunks: Vec<Box<[u64]>>,
    large: Vec<Box<[u64]>>,
    chunk: usize,
    offset: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            large: Vec::new(),
            chunk: 0,
            offset: 0,
        }
    }

    /// Allocate `len` zeroed bytes, valid until the next `reset`.
    pub fn alloc(&mut self, len: usize) -> *mut u8 {
        if len > CHUNK_SIZE {
            let buf = vec![0u64; len.div_ceil(8)].into_boxed_slice();
            self.large.push(buf);
            return self.large.last_mut().unwrap().as_mut_ptr() as *mut u8;
        }

        // Keep every allocation 8-aligned.
        let len = len.div_ceil(8) * 8;

        if self.chunks.is_empty() {
            self.chunks.push(vec![0u64; CHUNK_WORDS].into_boxed_slice());
        }
        if self.offset + len > CHUNK_SIZE {
            self.chunk += 1;
            self.offset = 0;
            if self.chunk == self.chunks.len() {
                self.chunks.push(vec![0u64; CHUNK_WORDS].into_boxed_slice());
            }
        }

        let base = self.chunks[self.chunk].as_mut_ptr() as *mut u8;
        // SAFETY: offset + len <= CHUNK_SIZE, checked above.
        let p = unsafe { base.add(self.offset) };
        // Reused chunks hold data from the previous TB.
        unsafe { ptr::write_bytes(p, 0, len) };
        self.offset += len;
        p
    }

    /// Allocate a zeroed byte slice, valid until the next `reset`.
    ///
    /// # Safety
    /// The caller must drop the slice before `reset` (or any other
    /// operation that recycles the arena, such as `Context::func_start`)
    /// runs, and must not request overlapping slices. Chunk storage is
    /// heap-boxed and never moves, so further `alloc` calls do not
    /// invalidate the slice.
    pub unsafe fn alloc_bytes<'a>(&mut self, len: usize) -> &'a mut [u8] {
        let p = self.alloc(len);
        std::slice::from_raw_parts_mut(p, len)
    }

    /// Allocate a zeroed `u32` slice, valid until the next `reset`.
    ///
    /// # Safety
    /// Same contract as [`Arena::alloc_bytes`]. Alignment is guaranteed by
    /// the word-backed chunks.
    pub unsafe fn alloc_u32s<'a>(&mut self, len: usize) -> &'a mut [u32] {
        let p = self.alloc(len * 4) as *mut u32;
        std::slice::from_raw_parts_mut(p, len)
    }

    /// Recycle all memory: oversize allocations are dropped, chunks are
    /// kept and the bump pointer moves back to the first one.
    pub fn reset(&mut self) {
        self.large.clear();
        self.chunk = 0;
        self.offset = 0;
    }

    /// Number of resident reusable chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of live oversize allocations.
    pub fn large_count(&self) -> usize {
        self.large.len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
