//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use heatwatch_store::{Store, ReadingQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let now = OffsetDateTime::now_utc();
//!
//! let query = ReadingQuery::new()
//!     .since(now - Duration::hours(24))
//!     .until(now)
//!     .oldest_first()
//!     .limit(5000);
//!
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), heatwatch_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::store::{lower_bound, upper_bound};

/// Fluent query builder for [`Store::query_readings`](crate::Store::query_readings).
///
/// By default results are ordered by `captured_at` descending (newest first)
/// with no limit. Both time bounds are inclusive.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub newest_first: bool,
}

impl ReadingQuery {
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Readings captured at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Readings captured at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Ascending by `captured_at`.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<i64>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(lower_bound(since));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(upper_bound(until));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, captured_at, temperature, humidity FROM readings {} \
             ORDER BY captured_at {}, id {}",
            where_clause, order, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_default_query_has_no_filters() {
        let query = ReadingQuery::new();
        let (where_clause, params) = query.build_where();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
        assert!(query.build_sql().contains("ORDER BY captured_at DESC"));
    }

    #[test]
    fn test_time_range_query() {
        let query = ReadingQuery::new()
            .since(datetime!(2024-05-01 00:00:00 UTC))
            .until(datetime!(2024-05-02 00:00:00 UTC))
            .oldest_first()
            .limit(10);
        let (where_clause, params) = query.build_where();
        assert_eq!(where_clause, "WHERE captured_at >= ? AND captured_at <= ?");
        assert_eq!(params, vec![1714521600, 1714608000]);

        let sql = query.build_sql();
        assert!(sql.contains("ORDER BY captured_at ASC"));
        assert!(sql.ends_with("LIMIT 10"));
    }
}
