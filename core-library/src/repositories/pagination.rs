//! Offset pagination for repository listings

use serde::{Deserialize, Serialize};

/// Largest page a listing returns in one call
pub const MAX_PAGE_SIZE: u32 = 500;

/// Requested page, 0-indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// ```
    /// use core_library::repositories::PageRequest;
    ///
    /// let request = PageRequest::new(2, 20);
    /// assert_eq!(request.offset(), 40);
    /// assert_eq!(PageRequest::new(0, 10_000).limit(), 500);
    /// ```
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> u32 {
        self.page.saturating_mul(self.limit())
    }

    pub fn limit(&self) -> u32 {
        self.page_size.min(MAX_PAGE_SIZE)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 50,
        }
    }
}

/// One page of results plus the size of the whole result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let page_size = request.limit();
        let total_pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size as u64) as u32
        };

        Self {
            items,
            total,
            page: request.page,
            total_pages,
            page_size,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_counts() {
        let page = Page::new(vec![1, 2, 3], 25, PageRequest::new(0, 10));
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next());

        let last = Page::new(vec![1], 25, PageRequest::new(2, 10));
        assert!(!last.has_next());
    }

    #[test]
    fn test_page_size_clamped() {
        let request = PageRequest::new(1, 10_000);
        assert_eq!(request.limit(), MAX_PAGE_SIZE);
        assert_eq!(request.offset(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_zero_page_size() {
        let page: Page<u8> = Page::new(Vec::new(), 25, PageRequest::new(0, 0));
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next());
    }
}
