/// One page of results plus the page arithmetic callers usually need.
#[derive(Debug, Clone)]
pub struct Paginator<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
}

impl<T> Paginator<T> {
    /// `per_page` and `current_page` are clamped to at least 1.
    pub fn new(items: Vec<T>, total: u64, per_page: u64, current_page: u64) -> Self {
        Self {
            items,
            total,
            per_page: per_page.max(1),
            current_page: current_page.max(1),
        }
    }

    pub fn last_page(&self) -> u64 {
        self.total.div_ceil(self.per_page).max(1)
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page()
    }

    /// 1-based position of the first item on this page.
    pub fn first_item(&self) -> Option<u64> {
        if self.items.is_empty() {
            None
        } else {
            Some(
                (self.current_page - 1)
                    .saturating_mul(self.per_page)
                    .saturating_add(1),
            )
        }
    }

    pub fn last_item(&self) -> Option<u64> {
        self.first_item()
            .map(|first| first.saturating_add(self.items.len() as u64 - 1))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_page() {
        let page = Paginator::new(vec![(); 10], 45, 10, 2);
        assert_eq!(page.last_page(), 5);
        assert!(page.has_more_pages());
        assert_eq!(page.first_item(), Some(11));
        assert_eq!(page.last_item(), Some(20));
    }

    #[test]
    fn test_partial_last_page() {
        let page = Paginator::new(vec![(); 5], 45, 10, 5);
        assert!(!page.has_more_pages());
        assert_eq!(page.first_item(), Some(41));
        assert_eq!(page.last_item(), Some(45));
    }

    #[test]
    fn test_huge_page_numbers_saturate() {
        let page = Paginator::new(vec![()], 10, u64::MAX, u64::MAX);
        assert_eq!(page.first_item(), Some(u64::MAX));
        assert_eq!(page.last_item(), Some(u64::MAX));
        assert!(!page.has_more_pages());
    }

    #[test]
    fn test_empty_result() {
        let page: Paginator<()> = Paginator::new(vec![], 0, 0, 0);
        assert_eq!(page.per_page, 1);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.last_page(), 1);
        assert_eq!(page.first_item(), None);
        assert_eq!(page.last_item(), None);
        assert!(page.is_empty());
    }
}
