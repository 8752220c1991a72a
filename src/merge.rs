//! Combining fresh responses with previously accumulated data.

use std::sync::Arc;

use serde_json::Value;

/// `(previous data, new data) -> merged data`.
pub type MergeFn = Arc<dyn Fn(&Value, Value) -> Value + Send + Sync>;

/// Merges `fresh` into `prev`; without a merge function the fresh data wins.
pub fn merge(on_new_data: Option<&MergeFn>, prev: &Value, fresh: Value) -> Value {
    match on_new_data {
        Some(f) => f(prev, fresh),
        None => fresh,
    }
}

/// Merge function for paginated lists: appends array pages to the
/// accumulated array. Non-array data replaces the previous value.
pub fn append(prev: &Value, fresh: Value) -> Value {
    match (prev, fresh) {
        (Value::Array(prev), Value::Array(page)) => {
            let mut items = prev.clone();
            items.extend(page);
            Value::Array(items)
        }
        (_, fresh) => fresh,
    }
}

/// Tracks whether more pages are expected.
///
/// After each merge the number of items added is compared with `per_page`;
/// a short page means the end was reached and automatic triggers stop. This
/// only holds when the merge output grows with the page size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pagination {
    per_page: u32,
    has_more: bool,
}

impl Pagination {
    /// `per_page == 0` disables the cutoff.
    pub fn new(per_page: u32) -> Self {
        Self {
            per_page,
            has_more: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.per_page > 0
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Records one merge; returns the number of items it added when both
    /// sides are countable.
    pub fn observe(&mut self, prev: &Value, merged: &Value) -> Option<usize> {
        if !self.is_enabled() {
            return None;
        }
        let added = item_count(merged)?.saturating_sub(item_count(prev).unwrap_or(0));
        if added < self.per_page as usize {
            self.has_more = false;
        }
        Some(added)
    }

    pub fn reset(&mut self) {
        self.has_more = true;
    }
}

fn item_count(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Null => Some(0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{append, merge, MergeFn, Pagination};
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[test]
    fn default_merge_replaces() {
        assert_eq!(merge(None, &json!([1]), json!([2])), json!([2]));
    }

    #[test]
    fn custom_merge_sees_previous_data() {
        let sum: MergeFn = Arc::new(|prev, fresh| {
            json!(prev.as_i64().unwrap_or(0) + fresh.as_i64().unwrap_or(0))
        });
        assert_eq!(merge(Some(&sum), &json!(2), json!(3)), json!(5));
    }

    #[test]
    fn short_page_ends_pagination() {
        let mut pages = Pagination::new(3);

        let first = append(&Value::Null, json!([1, 2, 3]));
        assert_eq!(pages.observe(&Value::Null, &first), Some(3));
        assert!(pages.has_more());

        let second = append(&first, json!([4]));
        assert_eq!(second, json!([1, 2, 3, 4]));
        assert_eq!(pages.observe(&first, &second), Some(1));
        assert!(!pages.has_more());

        pages.reset();
        assert!(pages.has_more());
    }

    #[test]
    fn disabled_or_uncountable_data_is_ignored() {
        let mut disabled = Pagination::new(0);
        assert_eq!(disabled.observe(&json!([]), &json!([])), None);
        assert!(disabled.has_more());

        let mut pages = Pagination::new(2);
        assert_eq!(pages.observe(&json!([]), &json!({"items": []})), None);
        assert!(pages.has_more());
    }
}
