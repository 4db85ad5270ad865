use parking_lot::Mutex;

/// Size of each KV cache page in tokens
pub const PAGE_SIZE: usize = 16;

/// Number of pages needed to hold `num_tokens` tokens
pub fn pages_for_tokens(num_tokens: usize) -> usize {
    num_tokens.div_ceil(PAGE_SIZE)
}

/// Paged KV cache accounting for the reference engine.
///
/// Tracks which fixed-size pages are free. Sequences reserve pages when they
/// are admitted and hand them back when they finish.
pub struct PagePool {
    /// Pool of available pages
    free_pages: Mutex<Vec<usize>>,
    /// Total number of pages in the pool
    total_pages: usize,
}

impl PagePool {
    pub fn new(total_pages: usize) -> Self {
        // Pop from the back so low page ids are handed out first
        let free_pages = (0..total_pages).rev().collect();
        Self {
            free_pages: Mutex::new(free_pages),
            total_pages,
        }
    }

    /// Allocate `count` pages, or none at all if the pool is short
    pub fn allocate_pages(&self, count: usize) -> Option<Vec<usize>> {
        let mut free_pages = self.free_pages.lock();
        if free_pages.len() < count {
            return None;
        }
        let split = free_pages.len() - count;
        let mut pages = free_pages.split_off(split);
        pages.reverse();
        Some(pages)
    }

    /// Free multiple pages
    pub fn free_pages(&self, page_ids: &[usize]) {
        let mut free_pages = self.free_pages.lock();
        free_pages.extend(page_ids.iter().rev());
    }

    /// Get number of available pages
    pub fn num_free_pages(&self) -> usize {
        self.free_pages.lock().len()
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let free_pages = self.num_free_pages();
        CacheStats {
            total_pages: self.total_pages,
            free_pages,
            used_pages: self.total_pages - free_pages,
            page_size: PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    pub page_size: usize,
}
