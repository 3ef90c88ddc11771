//! Page arithmetic over a visible id list. Pages are 0-indexed.

use serde::{Deserialize, Serialize};

/// Page index and size of the view a request is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }
    }

    /// Index of the first slot on this page, saturating at `usize::MAX`.
    pub fn first_slot(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }

    /// Index of the last slot on this page, occupied or not.
    pub fn last_slot(&self) -> usize {
        self.first_slot()
            .saturating_add(self.page_size)
            .saturating_sub(1)
    }

    /// Whether every slot index of this page fits in a `usize`.
    pub fn is_addressable(&self) -> bool {
        self.page
            .checked_add(1)
            .and_then(|pages| pages.checked_mul(self.page_size))
            .is_some()
    }

    pub fn holds_slot(&self, index: usize) -> bool {
        index >= self.first_slot() && index <= self.last_slot()
    }
}

/// New page and page count sent to the client when pagination shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationChange {
    pub page: usize,
    pub page_count: usize,
}

pub fn page_count(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

/// Inclusive `[begin, end]` range of visible indices printed on a page, or
/// `None` when the page holds no rows.
pub fn printed_range(len: usize, request: PageRequest) -> Option<(usize, usize)> {
    let begin = request.first_slot();
    if request.page_size == 0 || begin >= len {
        return None;
    }
    Some((begin, request.last_slot().min(len - 1)))
}

/// Reports a pagination change when the page count moved.
///
/// A page left without any visible row falls back to the previous one.
pub fn pagination_delta(old_count: usize, new_len: usize, request: PageRequest) -> Option<PaginationChange> {
    let new_count = page_count(new_len, request.page_size);
    if new_count == old_count {
        return None;
    }

    let page = if printed_range(new_len, request).is_none() {
        request.page.saturating_sub(1)
    } else {
        request.page
    };
    Some(PaginationChange {
        page,
        page_count: new_count,
    })
}
