use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use moka::future::Cache;

/// A previously-forwarded GET response, stored verbatim enough to replay it
/// without touching the upstream again.
#[derive(Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Process-local, best-effort cache of prior GET responses (§4.7). Never
/// shared across processes or restarts; a miss or a store failure simply
/// falls through to (or past) the upstream call.
pub struct ResponseCache {
    entries: Cache<String, CachedResponse>,
}

impl ResponseCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(max_age)
                .max_capacity(10_000)
                .build(),
        }
    }

    pub fn key(method: &str, path_and_query: &str) -> String {
        format!("{method}:{path_and_query}")
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.entries.get(key).await
    }

    pub async fn put(&self, key: String, value: CachedResponse) {
        self.entries.insert(key, value).await;
    }
}

/// Whether a just-forwarded response may be written to the cache: caching
/// enabled, method GET, response 2xx, no `no-cache`/`private` in
/// Cache-Control, and a cacheable Content-Type.
pub fn is_cacheable(
    caching_enabled: bool,
    method: &str,
    status: u16,
    cache_control: Option<&str>,
    content_type: Option<&str>,
) -> bool {
    if !caching_enabled || method != "GET" || !(200..300).contains(&status) {
        return false;
    }

    if let Some(cc) = cache_control {
        let lower = cc.to_ascii_lowercase();
        if lower.contains("no-cache") || lower.contains("private") {
            return false;
        }
    }

    matches!(content_type, Some(ct) if
        ct.starts_with("application/json")
            || ct.starts_with("text/")
            || ct.starts_with("application/xml"))
}

pub fn cached_at_header() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_get() {
        assert!(!is_cacheable(true, "POST", 200, None, Some("application/json")));
    }

    #[test]
    fn rejects_non_2xx() {
        assert!(!is_cacheable(true, "GET", 404, None, Some("application/json")));
    }

    #[test]
    fn rejects_no_cache_and_private() {
        assert!(!is_cacheable(
            true,
            "GET",
            200,
            Some("no-cache"),
            Some("application/json")
        ));
        assert!(!is_cacheable(
            true,
            "GET",
            200,
            Some("private, max-age=10"),
            Some("application/json")
        ));
    }

    #[test]
    fn accepts_json_text_and_xml() {
        assert!(is_cacheable(true, "GET", 200, None, Some("application/json")));
        assert!(is_cacheable(true, "GET", 200, None, Some("text/plain")));
        assert!(is_cacheable(true, "GET", 200, None, Some("application/xml")));
    }

    #[test]
    fn rejects_unlisted_content_type() {
        assert!(!is_cacheable(
            true,
            "GET",
            200,
            None,
            Some("application/octet-stream")
        ));
    }

    #[tokio::test]
    async fn round_trips_a_stored_entry() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = ResponseCache::key("GET", "/x");
        cache
            .put(
                key.clone(),
                CachedResponse {
                    status: 200,
                    headers: vec![("content-type".into(), "application/json".into())],
                    body: Bytes::from_static(b"{\"ok\":true}"),
                },
            )
            .await;
        let hit = cache.get(&key).await.expect("should hit");
        assert_eq!(hit.status, 200);
        assert_eq!(hit.body, Bytes::from_static(b"{\"ok\":true}"));
    }
}
