use std::ops::Range;

/// Page cursor over a collection whose size is known, either from the server
/// envelope or from a local list. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    page_size: usize,
    current_page: usize,
    total_items: usize,
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current_page: 1,
            total_items: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn total_pages(&self) -> usize {
        self.total_items.div_ceil(self.page_size)
    }

    /// No-op (returns `false`) when `page` is outside `1..=total_pages`.
    pub fn go_to_page(&mut self, page: usize) -> bool {
        if page < 1 || page > self.total_pages() {
            return false;
        }
        self.current_page = page;
        true
    }

    pub fn reset(&mut self) {
        self.current_page = 1;
    }

    /// Records a new total and clamps the cursor to the last page that still
    /// has items. Returns `true` when the page moved.
    pub fn set_total(&mut self, total_items: usize) -> bool {
        self.total_items = total_items;
        let last = self.total_pages().max(1);
        if self.current_page > last {
            self.current_page = last;
            return true;
        }
        false
    }

    pub fn range(&self) -> Range<usize> {
        let start = (self.current_page - 1) * self.page_size;
        let end = (start + self.page_size).min(self.total_items);
        start.min(end)..end
    }

    /// Current page of `items`, which is taken as the whole collection.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        page_slice(items, self.current_page, self.page_size)
    }
}

/// `items[(page-1)*size .. page*size]`, clipped to the slice bounds.
pub fn page_slice<T>(items: &[T], page: usize, size: usize) -> &[T] {
    if page == 0 || size == 0 {
        return &[];
    }
    let start = ((page - 1) * size).min(items.len());
    let end = (start + size).min(items.len());
    &items[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_concatenate_to_the_whole_sequence() {
        for len in [0usize, 1, 9, 10, 11, 25, 30] {
            for size in [1usize, 3, 10] {
                let items: Vec<usize> = (0..len).collect();
                let mut pager = Pagination::new(size);
                pager.set_total(items.len());

                let mut joined = Vec::new();
                for page in 1..=pager.total_pages() {
                    assert!(pager.go_to_page(page));
                    let chunk = pager.slice(&items);
                    assert!(!chunk.is_empty());
                    joined.extend_from_slice(chunk);
                }
                assert_eq!(joined, items, "len={len} size={size}");
                assert_eq!(pager.total_pages(), len.div_ceil(size));
            }
        }
    }

    #[test]
    fn go_to_page_rejects_out_of_range() {
        let mut pager = Pagination::new(10);
        pager.set_total(25);
        assert!(!pager.go_to_page(0));
        assert!(!pager.go_to_page(4));
        assert_eq!(pager.current_page(), 1);
        assert!(pager.go_to_page(3));
        assert_eq!(pager.range(), 20..25);
    }

    #[test]
    fn shrinking_total_clamps_to_last_page() {
        let mut pager = Pagination::new(10);
        pager.set_total(21);
        assert!(pager.go_to_page(3));

        assert!(pager.set_total(20));
        assert_eq!(pager.current_page(), 2);

        assert!(pager.set_total(0));
        assert_eq!(pager.current_page(), 1);
        assert_eq!(pager.range(), 0..0);
    }
}
