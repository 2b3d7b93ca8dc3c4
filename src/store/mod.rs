//! In-memory, path-keyed KV store.
//!
//! One store exists per backend plus one merged store per resource. All
//! operations are atomic per call; the resource guarantees a single
//! writer for the merged store, so a plain reader-writer lock over an
//! ordered map is sufficient.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use glob::MatchOptions;
use glob::Pattern;
use parking_lot::RwLock;
use serde::Serialize;

#[cfg(test)]
mod store_test;

/// A single key-value entry. Serializable so template functions can hand
/// it to the render context as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

/// Path-keyed map from absolute keys (`/a/b/c`) to string values.
///
/// Cloning is cheap and clones share the underlying map; a backend and
/// the tasks it spawns all observe the same data.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<BTreeMap<String, String>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes a key into absolute path form: leading slash, no
    /// trailing slash, no empty segments. An empty input becomes `/`.
    pub(crate) fn normalize(key: &str) -> String {
        let mut out = String::with_capacity(key.len() + 1);
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    pub fn set(
        &self,
        key: &str,
        value: impl Into<String>,
    ) {
        self.inner.write().insert(Self::normalize(key), value.into());
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.inner.read().get(&Self::normalize(key)).cloned()
    }

    pub fn exists(
        &self,
        key: &str,
    ) -> bool {
        self.inner.read().contains_key(&Self::normalize(key))
    }

    /// All entries ordered by key.
    pub fn get_all_kvs(&self) -> Vec<KvPair> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect()
    }

    pub fn purge(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Exact lookup returning the full pair, for the `get` template
    /// function.
    pub fn get_kv(
        &self,
        key: &str,
    ) -> Option<KvPair> {
        let key = Self::normalize(key);
        self.inner.read().get(&key).map(|v| KvPair {
            value: v.clone(),
            key,
        })
    }

    /// All pairs whose key matches the glob `pattern`, ordered by key.
    /// Wildcards do not cross `/` separators.
    pub fn get_all(
        &self,
        pattern: &str,
    ) -> Result<Vec<KvPair>, glob::PatternError> {
        let pattern = Pattern::new(pattern)?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };
        Ok(self
            .inner
            .read()
            .iter()
            .filter(|(k, _)| pattern.matches_with(k, options))
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    /// Names of the entries directly below `dir`, files and directories
    /// alike, sorted and deduplicated. A key equal to `dir` itself
    /// contributes its basename.
    pub fn list(
        &self,
        dir: &str,
    ) -> Vec<String> {
        self.children(dir, false)
    }

    /// Like [`list`](Self::list) but only names that have children of
    /// their own.
    pub fn list_dir(
        &self,
        dir: &str,
    ) -> Vec<String> {
        self.children(dir, true)
    }

    fn children(
        &self,
        dir: &str,
        dirs_only: bool,
    ) -> Vec<String> {
        let dir = Self::normalize(dir);
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };

        let map = self.inner.read();
        let mut names = BTreeSet::new();

        if !dirs_only && map.contains_key(&dir) {
            if let Some(base) = dir.rsplit('/').next().filter(|s| !s.is_empty()) {
                names.insert(base.to_string());
            }
        }

        for key in map.keys() {
            if !key.starts_with(&prefix) || key.as_str() == dir {
                continue;
            }
            let rest = &key[prefix.len()..];
            let mut segments = rest.split('/');
            if let Some(name) = segments.next().filter(|s| !s.is_empty()) {
                if !dirs_only || segments.next().is_some() {
                    names.insert(name.to_string());
                }
            }
        }

        names.into_iter().collect()
    }
}
