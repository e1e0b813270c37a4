//! Fault-injection filters: drop a stage request or its response.
//!
//! Filters are keyed by (partition, origin service) and hold a set of
//! attributes. A stage call is dropped when it carries every attribute the
//! filter names; an empty filter never matches. Used by the test surface to
//! exercise retry and recovery paths.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use super::partition::gen_partitions;

type FilterTable = HashMap<(u64, String), HashSet<String>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FilterKind {
    Request,
    Response,
}

/// Per-(partition, service) request/response drop filters.
pub struct TxFilterManager {
    partitions: u64,
    requests: RwLock<FilterTable>,
    responses: RwLock<FilterTable>,
}

impl TxFilterManager {
    pub fn new(partitions: u64) -> Self {
        Self {
            partitions: gen_partitions(partitions),
            requests: RwLock::new(HashMap::new()),
            responses: RwLock::new(HashMap::new()),
        }
    }

    fn table(&self, kind: FilterKind) -> &RwLock<FilterTable> {
        match kind {
            FilterKind::Request => &self.requests,
            FilterKind::Response => &self.responses,
        }
    }

    fn add(&self, kind: FilterKind, partition: u64, service: &str, attrs: &[String]) {
        let key = (partition % self.partitions, service.to_string());
        let mut table = self.table(kind).write().unwrap_or_else(PoisonError::into_inner);
        table.entry(key).or_default().extend(attrs.iter().cloned());
    }

    fn remove(&self, kind: FilterKind, partition: u64, service: &str, attrs: &[String]) {
        let key = (partition % self.partitions, service.to_string());
        let mut table = self.table(kind).write().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = table.get_mut(&key) {
            for attr in attrs {
                set.remove(attr);
            }
        }
    }

    fn clear(&self, kind: FilterKind, partition: u64, service: &str) {
        let key = (partition % self.partitions, service.to_string());
        let mut table = self.table(kind).write().unwrap_or_else(PoisonError::into_inner);
        table.remove(&key);
    }

    fn matches(&self, kind: FilterKind, partition: u64, service: &str, attrs: &[String]) -> bool {
        let key = (partition % self.partitions, service.to_string());
        let table = self.table(kind).read().unwrap_or_else(PoisonError::into_inner);
        match table.get(&key) {
            Some(set) if !set.is_empty() => set.iter().all(|attr| attrs.contains(attr)),
            _ => false,
        }
    }

    pub fn add_request_filter(&self, partition: u64, service: &str, attrs: &[String]) {
        self.add(FilterKind::Request, partition, service, attrs);
    }

    pub fn add_response_filter(&self, partition: u64, service: &str, attrs: &[String]) {
        self.add(FilterKind::Response, partition, service, attrs);
    }

    pub fn remove_request_filter(&self, partition: u64, service: &str, attrs: &[String]) {
        self.remove(FilterKind::Request, partition, service, attrs);
    }

    pub fn remove_response_filter(&self, partition: u64, service: &str, attrs: &[String]) {
        self.remove(FilterKind::Response, partition, service, attrs);
    }

    pub fn clear_request_filter(&self, partition: u64, service: &str) {
        self.clear(FilterKind::Request, partition, service);
    }

    pub fn clear_response_filter(&self, partition: u64, service: &str) {
        self.clear(FilterKind::Response, partition, service);
    }

    /// Should this inbound stage request be dropped before any side effect?
    pub fn drop_request(&self, partition: u64, service: &str, attrs: &[String]) -> bool {
        self.matches(FilterKind::Request, partition, service, attrs)
    }

    /// Should the handler's response be discarded after it runs?
    pub fn drop_response(&self, partition: u64, service: &str, attrs: &[String]) -> bool {
        self.matches(FilterKind::Response, partition, service, attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_never_drops() {
        let mgr = TxFilterManager::new(10);
        assert!(!mgr.drop_request(3, "event", &attrs(&["x"])));
        assert!(!mgr.drop_request(3, "event", &[]));
    }

    #[test]
    fn test_drop_when_all_filtered_attrs_present() {
        let mgr = TxFilterManager::new(10);
        mgr.add_request_filter(3, "event", &attrs(&["x"]));
        assert!(mgr.drop_request(3, "event", &attrs(&["x"])));
        assert!(mgr.drop_request(3, "event", &attrs(&["x", "y"])));
        assert!(!mgr.drop_request(3, "event", &attrs(&["y"])));
        assert!(!mgr.drop_request(3, "event", &[]));
        // other partitions and services unaffected
        assert!(!mgr.drop_request(4, "event", &attrs(&["x"])));
        assert!(!mgr.drop_request(3, "user", &attrs(&["x"])));
    }

    #[test]
    fn test_request_and_response_filters_independent() {
        let mgr = TxFilterManager::new(10);
        mgr.add_response_filter(1, "event", &attrs(&["slow"]));
        assert!(!mgr.drop_request(1, "event", &attrs(&["slow"])));
        assert!(mgr.drop_response(1, "event", &attrs(&["slow"])));
    }

    #[test]
    fn test_remove_and_clear() {
        let mgr = TxFilterManager::new(10);
        mgr.add_request_filter(2, "event", &attrs(&["x", "y"]));
        mgr.remove_request_filter(2, "event", &attrs(&["y"]));
        assert!(mgr.drop_request(2, "event", &attrs(&["x"])));
        mgr.clear_request_filter(2, "event");
        assert!(!mgr.drop_request(2, "event", &attrs(&["x"])));
    }

    #[test]
    fn test_partition_wraps_modulo() {
        let mgr = TxFilterManager::new(10);
        mgr.add_request_filter(13, "event", &attrs(&["x"]));
        assert!(mgr.drop_request(3, "event", &attrs(&["x"])));
    }
}
