use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
/// Highest page whose offset still fits in an i64
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

/// `page`/`limit` as they arrive on the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageParams {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit, DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total + self.limit - 1) / self.limit
    }

    /// Builds `{<items_key>: [...], totalPages, currentPage, <total_key>}`
    pub fn envelope<T: Serialize>(
        &self,
        items_key: &str,
        total_key: &str,
        items: &[T],
        total: i64,
    ) -> cja::Result<Value> {
        let mut map = Map::new();
        map.insert(items_key.to_string(), serde_json::to_value(items)?);
        map.insert("totalPages".to_string(), self.total_pages(total).into());
        map.insert("currentPage".to_string(), self.page.into());
        map.insert(total_key.to_string(), total.into());
        Ok(Value::Object(map))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Escape `%`, `_` and `\` so user input is matched literally by ILIKE
pub fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_and_clamping() {
        assert_eq!(
            Pagination::new(None, None, DEFAULT_LIMIT),
            Pagination { page: 1, limit: 20 }
        );
        assert_eq!(
            Pagination::new(Some(0), Some(1000), DEFAULT_LIMIT),
            Pagination { page: 1, limit: 100 }
        );
        assert_eq!(
            Pagination::new(Some(-3), Some(0), DEFAULT_LIMIT),
            Pagination { page: 1, limit: 1 }
        );
    }

    #[test]
    fn test_huge_page_does_not_overflow_offset() {
        let p = Pagination::new(Some(i64::MAX), Some(MAX_LIMIT), DEFAULT_LIMIT);
        assert_eq!(p.page, MAX_PAGE);
        assert!(p.offset() >= 0);
        assert_eq!(p.total_pages(3), 1);
    }

    #[test]
    fn test_offset_and_total_pages() {
        let p = Pagination::new(Some(3), Some(20), DEFAULT_LIMIT);
        assert_eq!(p.offset(), 40);
        assert_eq!(p.total_pages(0), 0);
        assert_eq!(p.total_pages(20), 1);
        assert_eq!(p.total_pages(41), 3);
    }

    #[test]
    fn test_envelope_shape() {
        let p = Pagination::new(Some(2), Some(2), DEFAULT_LIMIT);
        let value = p.envelope("posts", "totalPosts", &["a", "b"], 5).unwrap();
        assert_eq!(
            value,
            json!({"posts": ["a", "b"], "totalPages": 3, "currentPage": 2, "totalPosts": 5})
        );
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("100%_done\\"), "%100\\%\\_done\\\\%");
    }
}
