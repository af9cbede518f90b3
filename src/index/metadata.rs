//! `MetadataIndex`: five parallel inverted maps (source, tag, category,
//! content_type, event date) supporting an AND-query across all supplied
//! filters. Dirty-counter flush rather than a WAL: accumulate mutations,
//! then periodically flush to disk.
use crate::error::RecallResult;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

const FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    by_source: std::collections::HashMap<String, HashSet<String>>,
    by_tag: std::collections::HashMap<String, HashSet<String>>,
    by_category: std::collections::HashMap<String, HashSet<String>>,
    by_content_type: std::collections::HashMap<String, HashSet<String>>,
    by_event_date: std::collections::HashMap<String, HashSet<String>>,
}

#[derive(Debug, Default, Clone)]
pub struct MetadataQuery {
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub event_time_start: Option<String>,
    pub event_time_end: Option<String>,
}

pub struct MetadataIndex {
    path: PathBuf,
    by_source: DashMap<String, HashSet<String>>,
    by_tag: DashMap<String, HashSet<String>>,
    by_category: DashMap<String, HashSet<String>>,
    by_content_type: DashMap<String, HashSet<String>>,
    by_event_date: DashMap<String, HashSet<String>>,
    dirty_count: AtomicUsize,
}

impl MetadataIndex {
    pub fn open(data_root: &std::path::Path) -> RecallResult<Self> {
        let dir = data_root.join("indexes");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("metadata_index.json");

        let snapshot: Snapshot = std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default();

        Ok(Self {
            path,
            by_source: snapshot.by_source.into_iter().collect(),
            by_tag: snapshot.by_tag.into_iter().collect(),
            by_category: snapshot.by_category.into_iter().collect(),
            by_content_type: snapshot.by_content_type.into_iter().collect(),
            by_event_date: snapshot.by_event_date.into_iter().collect(),
            dirty_count: AtomicUsize::new(0),
        })
    }

    /// Normalize an event_time string (full ISO timestamp or bare date) to
    /// a `YYYY-MM-DD` key. Accepts RFC3339 first, then falls back to
    /// slicing the first 10 characters if they already look like a date.
    fn parse_date_key(event_time: &str) -> Option<String> {
        if event_time.is_empty() {
            return None;
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(event_time) {
            return Some(dt.format("%Y-%m-%d").to_string());
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(event_time, "%Y-%m-%d") {
            return Some(d.format("%Y-%m-%d").to_string());
        }
        let bytes = event_time.as_bytes();
        if bytes.len() >= 10 && bytes[4] == b'-' && bytes[7] == b'-' {
            return Some(event_time[..10].to_string());
        }
        None
    }

    fn mark_dirty(&self, n: usize) -> RecallResult<()> {
        let count = self.dirty_count.fetch_add(n, Ordering::SeqCst) + n;
        if count >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    pub fn add(
        &self,
        memory_id: &str,
        source: Option<&str>,
        tags: &[String],
        category: Option<&str>,
        content_type: Option<&str>,
        event_time: Option<&str>,
    ) -> RecallResult<()> {
        if let Some(source) = source.filter(|s| !s.is_empty()) {
            self.by_source.entry(source.to_string()).or_default().insert(memory_id.to_string());
        }
        for tag in tags {
            self.by_tag.entry(tag.clone()).or_default().insert(memory_id.to_string());
        }
        if let Some(category) = category.filter(|c| !c.is_empty()) {
            self.by_category.entry(category.to_string()).or_default().insert(memory_id.to_string());
        }
        if let Some(content_type) = content_type.filter(|c| !c.is_empty()) {
            self.by_content_type.entry(content_type.to_string()).or_default().insert(memory_id.to_string());
        }
        if let Some(date_key) = event_time.and_then(Self::parse_date_key) {
            self.by_event_date.entry(date_key).or_default().insert(memory_id.to_string());
        }
        self.mark_dirty(1)
    }

    pub fn query(&self, q: &MetadataQuery) -> HashSet<String> {
        let mut result: Option<HashSet<String>> = None;
        let mut intersect = |candidates: HashSet<String>, result: &mut Option<HashSet<String>>| {
            *result = Some(match result.take() {
                None => candidates,
                Some(existing) => existing.intersection(&candidates).cloned().collect(),
            });
        };

        if let Some(source) = &q.source {
            intersect(self.by_source.get(source).map(|v| v.clone()).unwrap_or_default(), &mut result);
        }
        for tag in &q.tags {
            intersect(self.by_tag.get(tag).map(|v| v.clone()).unwrap_or_default(), &mut result);
        }
        if let Some(category) = &q.category {
            intersect(self.by_category.get(category).map(|v| v.clone()).unwrap_or_default(), &mut result);
        }
        if let Some(content_type) = &q.content_type {
            intersect(self.by_content_type.get(content_type).map(|v| v.clone()).unwrap_or_default(), &mut result);
        }
        if q.event_time_start.is_some() || q.event_time_end.is_some() {
            intersect(self.query_by_date_range(q.event_time_start.as_deref(), q.event_time_end.as_deref()), &mut result);
        }
        result.unwrap_or_default()
    }

    fn query_by_date_range(&self, start: Option<&str>, end: Option<&str>) -> HashSet<String> {
        let start_key = start.and_then(Self::parse_date_key);
        let end_key = end.and_then(Self::parse_date_key);
        let mut matched = HashSet::new();
        for entry in self.by_event_date.iter() {
            let date_key = entry.key();
            if let Some(start_key) = &start_key {
                if date_key < start_key {
                    continue;
                }
            }
            if let Some(end_key) = &end_key {
                if date_key > end_key {
                    continue;
                }
            }
            matched.extend(entry.value().iter().cloned());
        }
        matched
    }

    pub fn remove(&self, memory_id: &str) -> RecallResult<()> {
        for mut entry in self.by_source.iter_mut() {
            entry.remove(memory_id);
        }
        for mut entry in self.by_tag.iter_mut() {
            entry.remove(memory_id);
        }
        for mut entry in self.by_category.iter_mut() {
            entry.remove(memory_id);
        }
        for mut entry in self.by_content_type.iter_mut() {
            entry.remove(memory_id);
        }
        for mut entry in self.by_event_date.iter_mut() {
            entry.remove(memory_id);
        }
        self.mark_dirty(1)
    }

    pub fn remove_batch(&self, memory_ids: &HashSet<String>) -> RecallResult<()> {
        for mut entry in self.by_source.iter_mut() {
            entry.retain(|id| !memory_ids.contains(id));
        }
        for mut entry in self.by_tag.iter_mut() {
            entry.retain(|id| !memory_ids.contains(id));
        }
        for mut entry in self.by_category.iter_mut() {
            entry.retain(|id| !memory_ids.contains(id));
        }
        for mut entry in self.by_content_type.iter_mut() {
            entry.retain(|id| !memory_ids.contains(id));
        }
        for mut entry in self.by_event_date.iter_mut() {
            entry.retain(|id| !memory_ids.contains(id));
        }
        self.mark_dirty(memory_ids.len().max(1))
    }

    pub fn clear(&self) -> RecallResult<()> {
        self.by_source.clear();
        self.by_tag.clear();
        self.by_category.clear();
        self.by_content_type.clear();
        self.by_event_date.clear();
        self.dirty_count.store(0, Ordering::SeqCst);
        self.flush()
    }

    pub fn flush(&self) -> RecallResult<()> {
        let snapshot = Snapshot {
            by_source: self.by_source.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            by_tag: self.by_tag.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            by_category: self.by_category.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            by_content_type: self.by_content_type.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            by_event_date: self.by_event_date.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty_count.store(0, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn and_query_across_source_and_tags() {
        let dir = tempdir().unwrap();
        let idx = MetadataIndex::open(dir.path()).unwrap();
        idx.add("m1", Some("chat"), &["ai".to_string()], None, None, None).unwrap();
        idx.add("m2", Some("chat"), &["sports".to_string()], None, None, None).unwrap();

        let q = MetadataQuery {
            source: Some("chat".to_string()),
            tags: vec!["ai".to_string()],
            ..Default::default()
        };
        assert_eq!(idx.query(&q), HashSet::from(["m1".to_string()]));
    }

    #[test]
    fn event_date_range_query() {
        let dir = tempdir().unwrap();
        let idx = MetadataIndex::open(dir.path()).unwrap();
        idx.add("m1", None, &[], None, None, Some("2025-01-20T10:00:00+08:00")).unwrap();
        idx.add("m2", None, &[], None, None, Some("2025-03-01")).unwrap();

        let q = MetadataQuery {
            event_time_start: Some("2025-01-01".to_string()),
            event_time_end: Some("2025-02-01".to_string()),
            ..Default::default()
        };
        assert_eq!(idx.query(&q), HashSet::from(["m1".to_string()]));
    }

    #[test]
    fn remove_drops_from_every_map() {
        let dir = tempdir().unwrap();
        let idx = MetadataIndex::open(dir.path()).unwrap();
        idx.add("m1", Some("chat"), &["ai".to_string()], Some("note"), None, None).unwrap();
        idx.remove("m1").unwrap();

        let q = MetadataQuery {
            source: Some("chat".to_string()),
            ..Default::default()
        };
        assert!(idx.query(&q).is_empty());
    }

    #[test]
    fn reload_from_disk_preserves_index_after_explicit_flush() {
        let dir = tempdir().unwrap();
        {
            let idx = MetadataIndex::open(dir.path()).unwrap();
            idx.add("m1", Some("chat"), &[], None, None, None).unwrap();
            idx.flush().unwrap();
        }
        let idx = MetadataIndex::open(dir.path()).unwrap();
        let q = MetadataQuery {
            source: Some("chat".to_string()),
            ..Default::default()
        };
        assert_eq!(idx.query(&q), HashSet::from(["m1".to_string()]));
    }
}
