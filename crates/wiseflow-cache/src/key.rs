//! Stable cache keys: a hash of `(method, path, sorted query)`
//! (spec.md §3 `CacheEntry`).

use sha2::{Digest, Sha256};

/// Computes the stable key for one cacheable call. Query pairs are
/// sorted before hashing so callers that build the query map in a
/// different order still hit the same cache entry.
pub fn cache_key(method: &str, path: &str, query: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = query.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\0");
    hasher.update(path.as_bytes());
    for (k, v) in sorted {
        hasher.update(b"\0");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }

    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Minimal local hex encoder so this crate does not need a dependency
/// solely for `Vec<u8> -> String`.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent_over_query() {
        let a = cache_key("GET", "/repos/octocat/hello", &[
            ("page".into(), "1".into()),
            ("per_page".into(), "30".into()),
        ]);
        let b = cache_key("GET", "/repos/octocat/hello", &[
            ("per_page".into(), "30".into()),
            ("page".into(), "1".into()),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_paths_differ() {
        let a = cache_key("GET", "/a", &[]);
        let b = cache_key("GET", "/b", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn method_is_case_insensitive() {
        let a = cache_key("get", "/a", &[]);
        let b = cache_key("GET", "/a", &[]);
        assert_eq!(a, b);
    }
}
