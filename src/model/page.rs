use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;
/// Highest page whose offset still fits in an `i64` at any allowed limit.
const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

/// Raw `page`/`limit` query parameters.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Normalised pagination window. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: DEFAULT_LIMIT }
    }
}

impl From<&PageQuery> for Page {
    fn from(query: &PageQuery) -> Self {
        Self {
            page: query.page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        Self {
            items,
            total,
            page: page.page,
            limit: page.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(None, None, 1, 10)]
    #[case(Some(0), Some(0), 1, 1)]
    #[case(Some(-3), Some(500), 1, 100)]
    #[case(Some(4), Some(25), 4, 25)]
    #[case(Some(i64::MAX), Some(100), MAX_PAGE, 100)]
    fn page_query_is_clamped(
        #[case] page: Option<i64>,
        #[case] limit: Option<i64>,
        #[case] expected_page: i64,
        #[case] expected_limit: i64,
    ) {
        let normalised = Page::from(&PageQuery { page, limit });
        assert_eq!(normalised.page, expected_page);
        assert_eq!(normalised.limit, expected_limit);
    }

    #[test]
    fn offset_skips_previous_pages() {
        let page = Page { page: 3, limit: 20 };
        assert_eq!(page.offset(), 40);
    }

    #[test]
    fn last_page_offset_fits() {
        let page = Page::from(&PageQuery {
            page: Some(i64::MAX),
            limit: Some(MAX_LIMIT),
        });
        assert!(page.offset() >= 0);
    }
}
