//! Stage 3: IoC extraction.
//!
//! The oracle proposes typed candidates; everything it returns is validated
//! against per-type rules before it may touch the store. A synthetic
//! `external-report-link` pointing at the post itself is always appended so
//! every indicator can be traced back to where it was seen.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;

use super::excerpt;
use crate::error::{ErrorBatch, FetchError, Result, UctiError};
use crate::oracle::Oracle;
use crate::store::{PostFilter, Store};
use crate::types::{IocCandidate, IocType, Post};

/// Oracle prompt window into the post text.
const IOC_EXCERPT_CHARS: usize = 2000;

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,}$").unwrap()
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\S+://[^\s/$.?#].\S*$").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

fn vulnerability_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(CVE|GHSA)-\d{4}-\d{4,}$").unwrap())
}

/// Restore common defanging so indicators validate and correlate.
pub fn refang(value: &str) -> String {
    value.replace("hxxp", "http").replace("[.]", ".")
}

/// A candidate that passed validation and may be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidIoc {
    pub ioc_type: IocType,
    pub subtype: Option<String>,
    pub value: String,
    pub comment: Option<String>,
}

/// Validate one oracle candidate. Returns `None` for unknown types and for
/// values that fail the type-specific rule; subtypes are derived here.
pub fn validate_candidate(candidate: &IocCandidate, post_url: &str) -> Option<ValidIoc> {
    let ioc_type = IocType::parse(&candidate.ioc_type)?;
    let value = refang(candidate.value.trim());
    let comment = candidate.comment.clone();

    let subtype = match ioc_type {
        IocType::Ip => match value.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => Some("ipv4".to_string()),
            Ok(IpAddr::V6(_)) => Some("ipv6".to_string()),
            Err(_) => return None,
        },
        IocType::Hash => {
            if !value.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            match value.len() {
                32 => Some("md5".to_string()),
                40 => Some("sha1".to_string()),
                64 => Some("sha256".to_string()),
                128 => Some("sha512".to_string()),
                _ => return None,
            }
        }
        IocType::Domain => {
            if !domain_re().is_match(&value) {
                return None;
            }
            None
        }
        IocType::Url => {
            if !url_re().is_match(&value) {
                return None;
            }
            None
        }
        IocType::ExternalReportLink => {
            if !url_re().is_match(&value) {
                return None;
            }
            if value == post_url {
                Some("post-link".to_string())
            } else {
                Some("external-article".to_string())
            }
        }
        IocType::Email => {
            if !email_re().is_match(&value) {
                return None;
            }
            None
        }
        IocType::Vulnerability => {
            if !vulnerability_re().is_match(&value) {
                return None;
            }
            None
        }
        // No syntactic rule exists for these; the oracle's word stands.
        IocType::BrowserExtensionId
        | IocType::Username
        | IocType::ThreatActor
        | IocType::Filename
        | IocType::Command => None,
    };

    Some(ValidIoc {
        ioc_type,
        subtype,
        value,
        comment,
    })
}

/// Drain every visible post with `iocs_assigned = false` (optionally
/// restricted to `ids`): extract, validate, link, mark done.
pub async fn assign_iocs(store: &Store, oracle: &dyn Oracle, ids: Option<Vec<i64>>) -> Result<()> {
    let mut selection = PostFilter::without_assigned_iocs();
    if let Some(ids) = ids {
        if ids.is_empty() {
            return Ok(());
        }
        selection = selection.with_ids(ids);
    }
    let posts = store.find_posts(&selection).await?;
    tracing::info!(count = posts.len(), "posts to extract IoCs from");

    let mut errors = ErrorBatch::new();
    for post in &posts {
        if let Err(error) = extract_one(store, oracle, post).await {
            errors.push(UctiError::Fetch(FetchError::single(
                format!("error extracting IoCs for post {}", post.id),
                error,
            )));
        }
    }
    errors.into_result("error extracting IoCs")
}

async fn extract_one(store: &Store, oracle: &dyn Oracle, post: &Post) -> Result<()> {
    let content = excerpt(&post.content_txt, IOC_EXCERPT_CHARS);
    let mut candidates = oracle.extract_iocs(content).await?;

    // The post's own link is an indicator of where the report lives.
    candidates.push(IocCandidate {
        value: post.url.clone(),
        ioc_type: IocType::ExternalReportLink.as_str().to_string(),
        comment: None,
    });

    let mut linked = 0usize;
    for candidate in &candidates {
        let Some(valid) = validate_candidate(candidate, &post.url) else {
            tracing::debug!(post = post.id, value = %candidate.value, "dropped invalid candidate");
            continue;
        };
        let ioc = store
            .upsert_ioc(
                valid.ioc_type,
                valid.subtype.as_deref(),
                &valid.value,
                valid.comment.as_deref(),
            )
            .await?;
        store.connect_ioc(post.id, ioc.id).await?;
        linked += 1;
    }
    tracing::debug!(post = post.id, linked, "IoCs linked");

    store.set_iocs_assigned(post.id, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, sample_post, MockOracle};

    const POST_URL: &str = "https://posts.example/mastodon/1";

    #[test]
    fn refang_restores_common_forms() {
        assert_eq!(refang("hxxps://evil[.]example[.]com"), "https://evil.example.com");
        assert_eq!(refang("1.2.3.4"), "1.2.3.4");
    }

    #[test]
    fn ip_subtype_is_derived_from_the_parsed_address() {
        let v4 = validate_candidate(&candidate("203.0.113.7", "ip"), POST_URL).unwrap();
        assert_eq!(v4.subtype.as_deref(), Some("ipv4"));
        let v6 = validate_candidate(&candidate("2001:db8::1", "ip"), POST_URL).unwrap();
        assert_eq!(v6.subtype.as_deref(), Some("ipv6"));
        assert!(validate_candidate(&candidate("999.1.1.1", "ip"), POST_URL).is_none());
    }

    #[test]
    fn hash_subtype_follows_hex_length() {
        let md5 = "d".repeat(32);
        let sha1 = "a".repeat(40);
        let sha256 = "b".repeat(64);
        let sha512 = "c".repeat(128);
        for (value, subtype) in [
            (md5.as_str(), "md5"),
            (sha1.as_str(), "sha1"),
            (sha256.as_str(), "sha256"),
            (sha512.as_str(), "sha512"),
        ] {
            let valid = validate_candidate(&candidate(value, "hash"), POST_URL).unwrap();
            assert_eq!(valid.subtype.as_deref(), Some(subtype));
        }
        assert!(validate_candidate(&candidate("abc123", "hash"), POST_URL).is_none());
        assert!(validate_candidate(&candidate(&"z".repeat(64), "hash"), POST_URL).is_none());
    }

    #[test]
    fn domain_email_url_vulnerability_rules() {
        assert!(validate_candidate(&candidate("evil.example.com", "domain"), POST_URL).is_some());
        assert!(validate_candidate(&candidate("not a domain", "domain"), POST_URL).is_none());
        assert!(validate_candidate(&candidate("-bad.example", "domain"), POST_URL).is_none());

        assert!(validate_candidate(&candidate("admin@evil.example", "email"), POST_URL).is_some());
        assert!(validate_candidate(&candidate("admin@@evil", "email"), POST_URL).is_none());

        assert!(validate_candidate(&candidate("https://evil.example/payload", "url"), POST_URL).is_some());
        assert!(validate_candidate(&candidate("evil.example/payload", "url"), POST_URL).is_none());

        assert!(validate_candidate(&candidate("CVE-2025-1234", "vulnerability"), POST_URL).is_some());
        assert!(validate_candidate(&candidate("GHSA-2024-99999", "vulnerability"), POST_URL).is_some());
        assert!(validate_candidate(&candidate("CVE-25-1234", "vulnerability"), POST_URL).is_none());
    }

    #[test]
    fn report_link_subtype_depends_on_the_post_url() {
        let own = validate_candidate(&candidate(POST_URL, "external-report-link"), POST_URL).unwrap();
        assert_eq!(own.subtype.as_deref(), Some("post-link"));
        let other = validate_candidate(
            &candidate("https://vendor.example/advisory", "external-report-link"),
            POST_URL,
        )
        .unwrap();
        assert_eq!(other.subtype.as_deref(), Some("external-article"));
    }

    #[test]
    fn unknown_types_are_dropped() {
        assert!(validate_candidate(&candidate("x", "registry-key"), POST_URL).is_none());
    }

    #[tokio::test]
    async fn extraction_links_valid_candidates_and_the_post_link() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_iocs(vec![
            candidate("hxxps://evil[.]example/payload", "url"),
            candidate("CVE-2025-1234", "vulnerability"),
            candidate("totally not an ip", "ip"),
        ]);
        let post = store
            .create_post(&sample_post("mastodon", "1", "campaign drops payload, patch now"), false)
            .await
            .unwrap();

        assign_iocs(&store, &oracle, None).await.unwrap();

        let iocs = store.iocs_for_post(post.id).await.unwrap();
        assert_eq!(iocs.len(), 3);
        assert!(iocs
            .iter()
            .any(|i| i.value == "https://evil.example/payload" && i.ioc_type == IocType::Url));
        assert!(iocs
            .iter()
            .any(|i| i.value == "CVE-2025-1234" && i.ioc_type == IocType::Vulnerability));
        assert!(iocs.iter().any(|i| {
            i.ioc_type == IocType::ExternalReportLink && i.subtype.as_deref() == Some("post-link")
        }));

        let post = store.find_post(post.id).await.unwrap().unwrap();
        assert!(post.iocs_assigned);
    }

    #[tokio::test]
    async fn rerun_does_not_duplicate_indicators() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_iocs(vec![candidate("CVE-2025-1234", "vulnerability")]);
        let post = store
            .create_post(&sample_post("mastodon", "1", "the same advisory posted twice"), false)
            .await
            .unwrap();

        assign_iocs(&store, &oracle, None).await.unwrap();
        // Second run selects nothing; even a forced rerun only upserts.
        store.set_iocs_assigned(post.id, false).await.unwrap();
        assign_iocs(&store, &oracle, None).await.unwrap();

        assert_eq!(store.iocs_for_post(post.id).await.unwrap().len(), 2);
    }
}
