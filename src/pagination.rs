//! Skip/limit pagination arithmetic.

use serde::Serialize;

/// A clamped page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number
    pub page: i64,
    pub limit: i64,
}

impl Page {
    /// Clamps `page` to at least 1 and `limit` to `1..=max_limit`, using
    /// `default_limit` when no limit was requested.
    pub fn new(page: Option<i64>, limit: Option<i64>, default_limit: i64, max_limit: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// Number of pages for `total` items; never less than 1.
    pub fn pages(&self, total: i64) -> i64 {
        ((total + self.limit - 1) / self.limit).max(1)
    }
}

/// Response envelope for paginated ad listings.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub ads: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        Self { ads: items, total, page: page.page, pages: page.pages(total) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        assert_eq!(Page::new(None, None, 10, 50), Page { page: 1, limit: 10 });
        assert_eq!(Page::new(Some(0), Some(500), 10, 50), Page { page: 1, limit: 50 });
        assert_eq!(Page::new(Some(-3), Some(0), 10, 50), Page { page: 1, limit: 1 });
    }

    #[test]
    fn offset_and_pages() {
        let page = Page::new(Some(3), Some(10), 10, 50);
        assert_eq!(page.offset(), 20);
        assert_eq!(page.pages(0), 1);
        assert_eq!(page.pages(10), 1);
        assert_eq!(page.pages(11), 2);
        assert_eq!(page.pages(95), 10);
    }
}
