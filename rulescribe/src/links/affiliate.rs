//! Marketplace host checks and affiliate tagging.

use url::Url;

/// Query parameter carrying the affiliate tracking id.
pub const TAG_PARAM: &str = "tag";

/// Accepted marketplace hosts plus an optional tracking id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplacePolicy {
    domains: Vec<String>,
    tracking_id: Option<String>,
}

impl Default for MarketplacePolicy {
    fn default() -> Self {
        Self::new(vec!["amazon.co.jp".to_string(), "amazon.com".to_string()], None)
    }
}

impl MarketplacePolicy {
    pub fn new(domains: Vec<String>, tracking_id: Option<String>) -> Self {
        Self {
            domains: domains.into_iter().map(|d| d.to_lowercase()).collect(),
            tracking_id: tracking_id.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Host equals a marketplace domain or is a subdomain of one.
    pub fn is_marketplace(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }

    /// Parse `raw`, check the host and apply the tracking id.
    ///
    /// Returns `None` for unparseable or non-marketplace URLs. An existing
    /// `tag` is replaced, so applying this twice gives the same URL. A URL
    /// that needs no rewrite comes back exactly as given (trimmed).
    pub fn accept(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).ok()?;
        if !matches!(url.scheme(), "http" | "https") || !self.is_marketplace(&url) {
            return None;
        }
        if self.is_tagged(&url) {
            return Some(trimmed.to_string());
        }
        Some(self.ensure_tag(url).into())
    }

    /// No tracking id configured, or exactly one `tag` carrying ours.
    fn is_tagged(&self, url: &Url) -> bool {
        let Some(tag) = &self.tracking_id else {
            return true;
        };
        let mut tags = url.query_pairs().filter(|(k, _)| k == TAG_PARAM);
        matches!((tags.next(), tags.next()), (Some((_, v)), None) if v == tag.as_str())
    }

    fn ensure_tag(&self, mut url: Url) -> Url {
        let Some(tag) = &self.tracking_id else {
            return url;
        };

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != TAG_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair(TAG_PARAM, tag);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged() -> MarketplacePolicy {
        MarketplacePolicy::new(
            vec!["amazon.co.jp".into(), "amazon.com".into()],
            Some("scribe-22".into()),
        )
    }

    #[test]
    fn test_tag_appended() {
        assert_eq!(
            tagged().accept("https://www.amazon.co.jp/dp/B00TEST").as_deref(),
            Some("https://www.amazon.co.jp/dp/B00TEST?tag=scribe-22")
        );
    }

    #[test]
    fn test_tag_rewritten_not_duplicated() {
        let policy = tagged();
        let once = policy
            .accept("https://www.amazon.com/s?k=catan&tag=other-20")
            .unwrap();
        assert_eq!(once, "https://www.amazon.com/s?k=catan&tag=scribe-22");

        let twice = policy.accept(&once).unwrap();
        assert_eq!(twice, once);
        assert_eq!(twice.matches("tag=").count(), 1);
    }

    #[test]
    fn test_tagged_url_kept_verbatim() {
        let policy = tagged();
        assert_eq!(
            policy.accept(" https://amazon.co.jp?tag=scribe-22 ").as_deref(),
            Some("https://amazon.co.jp?tag=scribe-22")
        );
        assert_eq!(
            MarketplacePolicy::default().accept("https://www.amazon.com").as_deref(),
            Some("https://www.amazon.com")
        );
    }

    #[test]
    fn test_foreign_hosts_rejected() {
        let policy = tagged();
        assert_eq!(policy.accept("https://amazon.co.jp.evil.example/dp/1"), None);
        assert_eq!(policy.accept("https://notamazon.com/dp/1"), None);
        assert_eq!(policy.accept("not a url"), None);
        assert_eq!(policy.accept("ftp://www.amazon.com/dp/1"), None);
    }

    #[test]
    fn test_untagged_policy_passes_through() {
        let policy = MarketplacePolicy::default();
        assert_eq!(
            policy.accept("https://amazon.com/dp/1?tag=keep-20").as_deref(),
            Some("https://amazon.com/dp/1?tag=keep-20")
        );
    }
}
