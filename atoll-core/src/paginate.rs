//! Offset pagination over materialized sequences.
//!
//! The page invariant: for `N` matching rows a page holds
//! `min(limit, max(0, N - offset))` items and `total` always reports the
//! unpaginated `N`.

use serde::Serialize;

/// Page size applied when a request leaves `limit` at zero.
pub const DEFAULT_LIMIT: u64 = 10;

/// One page of results plus pagination echo fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matching rows before the window was applied.
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Resolve a requested limit: zero falls back to [`DEFAULT_LIMIT`].
pub fn effective_limit(limit: u64) -> u64 {
    if limit == 0 {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

/// Cut one window out of a fully materialized sequence.
pub fn paginate_slice<T: Clone>(items: &[T], limit: u64, offset: u64) -> Page<T> {
    let total = items.len() as u64;
    let window = items
        .iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect();
    Page {
        items: window,
        total,
        limit,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_respects_limit_and_offset() {
        let items: Vec<i64> = (0..25).collect();
        let page = paginate_slice(&items, 10, 20);
        assert_eq!(page.items, vec![20, 21, 22, 23, 24]);
        assert_eq!(page.total, 25);
        assert_eq!(page.limit, 10);
        assert_eq!(page.offset, 20);
    }

    #[test]
    fn offset_past_end_yields_empty_page() {
        let items: Vec<i64> = (0..3).collect();
        let page = paginate_slice(&items, 10, 5);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn zero_limit_falls_back_to_default() {
        assert_eq!(effective_limit(0), DEFAULT_LIMIT);
        assert_eq!(effective_limit(25), 25);
    }
}
