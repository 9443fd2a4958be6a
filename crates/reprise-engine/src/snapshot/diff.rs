use reprise_common::protocol::{BrowserState, Cookie, CookieKey, StorageMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys present only on the right (`added`), only on the left (`removed`), or on both
/// sides with different values (`modified`). Each list is sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDiff<K> {
    pub added: Vec<K>,
    pub removed: Vec<K>,
    pub modified: Vec<K>,
}

impl<K> Default for SetDiff<K> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
        }
    }
}

impl<K> SetDiff<K> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    pub cookies: SetDiff<CookieKey>,
    pub local_storage: SetDiff<String>,
    pub session_storage: SetDiff<String>,
    pub url_changed: bool,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
            && self.local_storage.is_empty()
            && self.session_storage.is_empty()
            && !self.url_changed
    }
}

/// Compare two states. Order of cookies and storage entries is irrelevant.
pub fn diff(a: &BrowserState, b: &BrowserState) -> StateDiff {
    StateDiff {
        cookies: diff_maps(&cookie_index(&a.cookies), &cookie_index(&b.cookies)),
        local_storage: diff_maps(&a.local_storage, &b.local_storage),
        session_storage: diff_maps(&a.session_storage, &b.session_storage),
        url_changed: a.page_url != b.page_url,
    }
}

/// Index cookies by identity. A later duplicate of the same identity wins, like a
/// browser cookie jar.
fn cookie_index(cookies: &[Cookie]) -> BTreeMap<CookieKey, &Cookie> {
    cookies.iter().map(|c| (c.key(), c)).collect()
}

fn diff_maps<K, V>(left: &BTreeMap<K, V>, right: &BTreeMap<K, V>) -> SetDiff<K>
where
    K: Ord + Clone,
    V: PartialEq,
{
    let mut out = SetDiff::default();
    for (key, value) in left {
        match right.get(key) {
            None => out.removed.push(key.clone()),
            Some(other) if other != value => out.modified.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in right.keys() {
        if !left.contains_key(key) {
            out.added.push(key.clone());
        }
    }
    out
}

/// Storage diff on its own, for callers holding bare maps.
pub fn diff_storage(a: &StorageMap, b: &StorageMap) -> SetDiff<String> {
    diff_maps(a, b)
}
