//! Cache key derivation.
//!
//! Every key lives under [`KEY_NAMESPACE`] and starts with its query family,
//! so families (and scopes within a family) can be evicted by prefix:
//!
//! ```text
//! contentgate:posts:<digest>                  post lists
//! contentgate:post:<id>                       single post
//! contentgate:category_posts:<id>:<digest>    one category's post lists
//! contentgate:comments:post-<id>:<digest>     one post's comment lists
//! contentgate:comments:all:<digest>           unscoped comment lists
//! contentgate:site_info                       site info
//! ```
//!
//! List digests are sha-256 over a canonical, name-sorted encoding of the
//! parameter set, so argument order never changes the key.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// Root of every key this crate writes.
pub const KEY_NAMESPACE: &str = "contentgate";

/// A cacheable read query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryFamily {
    Posts,
    Post,
    Pages,
    Page,
    Categories,
    CategoryPosts,
    Comments,
    SiteInfo,
}

impl QueryFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Post => "post",
            Self::Pages => "pages",
            Self::Page => "page",
            Self::Categories => "categories",
            Self::CategoryPosts => "category_posts",
            Self::Comments => "comments",
            Self::SiteInfo => "site_info",
        }
    }
}

impl fmt::Display for QueryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which comments a comment-list query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentScope {
    /// No post filter.
    All,
    Post(u64),
}

impl CommentScope {
    pub fn from_post(post: Option<u64>) -> Self {
        match post {
            Some(id) if id > 0 => Self::Post(id),
            _ => Self::All,
        }
    }

    fn segment(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Post(id) => format!("post-{id}"),
        }
    }
}

/// Request parameters, normalised to name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    params: BTreeMap<String, String>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.params.insert(name.into(), value.to_string());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds the parameter only when present.
    pub fn with_opt<V: ToString>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Hex sha-256 of the canonical encoding.
    ///
    /// Names and values are length-prefixed, so no value can masquerade as a
    /// separator (`{a: "1&b=2"}` and `{a: "1", b: "2"}` differ).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.params {
            hasher.update(format!("{}:{name}={}:{value};", name.len(), value.len()).as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// Key of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a list query of `family`.
    pub fn list(family: QueryFamily, params: &ParamSet) -> Self {
        Self(format!(
            "{KEY_NAMESPACE}:{}:{}",
            family.as_str(),
            params.digest()
        ))
    }

    /// Key for a single item of `family`.
    pub fn item(family: QueryFamily, id: u64) -> Self {
        Self(format!("{KEY_NAMESPACE}:{}:{id}", family.as_str()))
    }

    pub fn posts(params: &ParamSet) -> Self {
        Self::list(QueryFamily::Posts, params)
    }

    pub fn post(id: u64) -> Self {
        Self::item(QueryFamily::Post, id)
    }

    pub fn pages(params: &ParamSet) -> Self {
        Self::list(QueryFamily::Pages, params)
    }

    pub fn page(id: u64) -> Self {
        Self::item(QueryFamily::Page, id)
    }

    pub fn categories(params: &ParamSet) -> Self {
        Self::list(QueryFamily::Categories, params)
    }

    pub fn category_posts(category_id: u64, params: &ParamSet) -> Self {
        Self(format!(
            "{}{}",
            KeyPrefix::category_posts(category_id).as_str(),
            params.digest()
        ))
    }

    pub fn comments(scope: CommentScope, params: &ParamSet) -> Self {
        Self(format!(
            "{}{}",
            KeyPrefix::comments(scope).as_str(),
            params.digest()
        ))
    }

    pub fn site_info() -> Self {
        Self(format!("{KEY_NAMESPACE}:{}", QueryFamily::SiteInfo.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Ordered key index range scans look keys up by `&str` prefix.
impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix selecting a group of keys. Always ends with `:` so that
/// `posts:` never selects `post:7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    /// Every key written by this crate.
    pub fn namespace() -> Self {
        Self(format!("{KEY_NAMESPACE}:"))
    }

    /// Every key of `family`.
    pub fn family(family: QueryFamily) -> Self {
        Self(format!("{KEY_NAMESPACE}:{}:", family.as_str()))
    }

    pub fn category_posts(category_id: u64) -> Self {
        Self(format!(
            "{KEY_NAMESPACE}:{}:{category_id}:",
            QueryFamily::CategoryPosts.as_str()
        ))
    }

    pub fn comments(scope: CommentScope) -> Self {
        Self(format!(
            "{KEY_NAMESPACE}:{}:{}:",
            QueryFamily::Comments.as_str(),
            scope.segment()
        ))
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        key.as_str().starts_with(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
