use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 1000;

/// Pagination parameters for read model queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Cut one page out of an already filtered and ordered result set.
    pub fn apply<T>(self, items: Vec<T>) -> Page<T> {
        // Deserialized values bypass `new`, so the cap is enforced here too.
        let limit = self.limit.min(MAX_LIMIT) as usize;
        let offset = self.offset as usize;
        let total = items.len() as u64;
        let has_more = offset.saturating_add(limit) < items.len();

        Page {
            items: items.into_iter().skip(offset).take(limit).collect(),
            total,
            pagination: self,
            has_more,
        }
    }
}

/// Paginated query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}
