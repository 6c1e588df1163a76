// src/store/pagination.rs
use std::ops::Range;

use serde::Serialize;

use crate::error::ValidationErrors;

/// Page window over the feed. Pages are 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    items_count: usize,
    current_page: usize,
}

impl Pagination {
    pub fn new(items_count: usize, current_page: usize) -> Result<Self, ValidationErrors> {
        if items_count == 0 {
            return Err(ValidationErrors::single(
                "items_count",
                "Page size must be at least 1",
            ));
        }
        Ok(Self {
            items_count,
            current_page: current_page.max(1),
        })
    }

    pub fn items_count(&self) -> usize {
        self.items_count
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn pages_count(&self, total: usize) -> usize {
        total.div_ceil(self.items_count)
    }

    pub fn range(&self, total: usize) -> Range<usize> {
        let start = (self.current_page - 1)
            .saturating_mul(self.items_count)
            .min(total);
        let end = start.saturating_add(self.items_count).min(total);
        start..end
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range(items.len())]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub items_count: usize,
    pub pages_count: usize,
    pub total: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

impl<T: Clone> Page<T> {
    pub fn of(items: &[T], pagination: Pagination) -> Self {
        let pages_count = pagination.pages_count(items.len());
        Self {
            items: pagination.slice(items).to_vec(),
            current_page: pagination.current_page(),
            items_count: pagination.items_count(),
            pages_count,
            total: items.len(),
            has_previous: pagination.current_page() > 1,
            has_next: pagination.current_page() < pages_count,
        }
    }
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            current_page: self.current_page,
            items_count: self.items_count,
            pages_count: self.pages_count,
            total: self.total,
            has_previous: self.has_previous,
            has_next: self.has_next,
        }
    }
}
