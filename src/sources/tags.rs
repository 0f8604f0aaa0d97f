//! Tag/vote catalog client (REST GET, XML body).
//!
//! This catalog bans aggressive clients, so every request goes through the
//! soft-cap spacing and the ban state short-circuits before any network call.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::classify_status;
use crate::cache::{now_unix_ms, PersistentCache, ResponseCache};
use crate::cancellation::CancellationFlag;
use crate::config::SourcesConfig;
use crate::error::{SourceError, SourceResult};
use crate::http::{query_string, HttpTransport};
use crate::rate_limit::{BanNotice, BanState, SoftCapPolicy, SoftCapSpacing};

pub const CATALOG: &str = "tags";
pub const TAG_CACHE_TTL: Duration = Duration::from_secs(5 * 24 * 60 * 60);

const BAN_PHRASES: &[&str] = &[
    "banned",
    "temporary ban",
    "permanent ban",
    "ban ",
    "ban-",
    "too many requests",
    "rate limit",
    "rate-limit",
    "try again later",
    "cooldown",
    "slow down",
];

/// True when a body reads like a ban or throttle notice. A real anime
/// document is never one, whatever its text says.
pub fn is_ban_notice(body: &str) -> bool {
    if body.trim().is_empty() {
        return false;
    }
    let lowered = body.to_lowercase();
    if lowered.contains("<anime") {
        return false;
    }
    BAN_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

fn is_throttle_status(status: u16) -> bool {
    matches!(status, 403 | 429 | 503)
}

/// Reads tag names from `<tag><name>` elements. Returns `None` when the
/// document has no `<anime>` root.
pub fn parse_tag_names(xml: &str) -> Result<Option<Vec<String>>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut saw_anime_root = false;
    let mut names = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = element.name().as_ref().to_vec();
                if stack.is_empty() && name == b"anime" {
                    saw_anime_root = true;
                }
                stack.push(name);
            }
            Ok(Event::Empty(element)) => {
                if stack.is_empty() && element.name().as_ref() == b"anime" {
                    saw_anime_root = true;
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(text)) => {
                let in_tag_name = stack.len() >= 2
                    && stack[stack.len() - 1] == b"name"
                    && stack[stack.len() - 2] == b"tag";
                if in_tag_name {
                    let value = text.unescape().map_err(|error| error.to_string())?;
                    let trimmed = value.trim();
                    if !trimmed.is_empty() && !names.iter().any(|known| known == trimmed) {
                        names.push(trimmed.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => {
                return Err(format!(
                    "XML error at byte {}: {error}",
                    reader.buffer_position()
                ))
            }
        }
    }
    Ok(saw_anime_root.then_some(names))
}

pub struct TagClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    client_name: String,
    client_version: String,
    ban_backoff: Duration,
    spacing: SoftCapSpacing,
    bans: BanState,
    cache: Arc<ResponseCache<i64, Vec<String>>>,
    persistent: Option<Arc<PersistentCache>>,
}

impl TagClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sources: &SourcesConfig,
        persistent: Option<Arc<PersistentCache>>,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(CATALOG, TAG_CACHE_TTL));
        if let Some(store) = &persistent {
            store.register(cache.clone());
        }
        Self {
            transport,
            endpoint: sources.tag_endpoint.clone(),
            client_name: sources.tag_client_name.clone(),
            client_version: sources.tag_client_version.clone(),
            ban_backoff: Duration::from_secs(u64::from(sources.tag_ban_minutes) * 60),
            spacing: SoftCapSpacing::new(
                "Tags",
                SoftCapPolicy {
                    base_spacing: Duration::from_millis(sources.tag_min_spacing_ms),
                    slow_spacing: Duration::from_millis(sources.tag_slow_spacing_ms),
                    daily_soft_cap: sources.tag_daily_soft_cap,
                },
            ),
            bans: BanState::new(),
            cache,
            persistent,
        }
    }

    pub fn ban_notice(&self) -> Option<BanNotice> {
        self.bans.active_at(now_unix_ms())
    }

    fn set_ban(&self, now_unix_ms: i64, backoff: Duration, reason: String) {
        let until = now_unix_ms.saturating_add(backoff.as_millis() as i64);
        if self.bans.ban_until(until, reason.clone()) {
            warn!(
                "Tags: requests suspended for {:.1} minutes ({reason})",
                backoff.as_secs_f64() / 60.0
            );
        }
    }

    /// Tag names for one tag-catalog id, unfiltered.
    pub fn tags(&self, tag_id: i64, cancel: &CancellationFlag) -> SourceResult<Vec<String>> {
        self.tags_at(tag_id, cancel, now_unix_ms())
    }

    pub(crate) fn tags_at(
        &self,
        tag_id: i64,
        cancel: &CancellationFlag,
        now_unix_ms: i64,
    ) -> SourceResult<Vec<String>> {
        if let Some(store) = &self.persistent {
            store.ensure_loaded();
        }
        if let Some(tags) = self.cache.get_at(&tag_id, now_unix_ms) {
            debug!("Tags[{tag_id}]: cache hit ({} tags)", tags.len());
            return Ok(tags);
        }
        if let Some(notice) = self.bans.active_at(now_unix_ms) {
            debug!("Tags[{tag_id}]: skipped, suspended ({})", notice.reason);
            return Err(SourceError::Banned {
                catalog: CATALOG,
                until_unix_ms: notice.until_unix_ms,
                reason: notice.reason,
            });
        }
        if self.client_name.trim().is_empty() {
            return Err(SourceError::invalid_config(CATALOG, "client name is empty"));
        }

        self.spacing.acquire(cancel, now_unix_ms)?;
        let aid = tag_id.to_string();
        let url = format!(
            "{}?{}",
            self.endpoint,
            query_string(&[
                ("request", "anime"),
                ("client", &self.client_name),
                ("clientver", &self.client_version),
                ("protover", "1"),
                ("aid", &aid),
            ])
        );
        let response = self
            .transport
            .get(&url, &[("Accept-Encoding", "gzip")])
            .map_err(|error| SourceError::transient(CATALOG, error))?;
        cancel.check()?;

        if is_throttle_status(response.status) {
            let backoff = response.retry_after.unwrap_or(self.ban_backoff);
            let reason = format!("throttle response (status {})", response.status);
            self.set_ban(now_unix_ms, backoff, reason.clone());
            return Err(SourceError::Banned {
                catalog: CATALOG,
                until_unix_ms: now_unix_ms.saturating_add(backoff.as_millis() as i64),
                reason,
            });
        }
        if !response.is_success() {
            return Err(classify_status(CATALOG, tag_id, &response));
        }
        if is_ban_notice(&response.body) {
            let snippet: String = response.body.chars().take(160).collect();
            warn!("Tags[{tag_id}]: response looked like a ban notice: {snippet}");
            let reason = "response contained a ban notice".to_string();
            self.set_ban(now_unix_ms, self.ban_backoff, reason.clone());
            return Err(SourceError::Banned {
                catalog: CATALOG,
                until_unix_ms: now_unix_ms.saturating_add(self.ban_backoff.as_millis() as i64),
                reason,
            });
        }

        let tags = parse_tag_names(&response.body)
            .map_err(|error| SourceError::malformed(CATALOG, error))?
            .ok_or_else(|| {
                let snippet: String = response.body.chars().take(100).collect();
                SourceError::malformed(CATALOG, format!("no anime document: {snippet}"))
            })?;
        info!("Tags[{tag_id}]: cached {} tags", tags.len());
        self.cache.insert_at(tag_id, tags.clone(), now_unix_ms);
        if let Some(store) = &self.persistent {
            store.flush();
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{is_ban_notice, parse_tag_names, TagClient};
    use crate::cache::now_unix_ms;
    use crate::cancellation::CancellationFlag;
    use crate::config::SourcesConfig;
    use crate::error::{settle_list, SourceError};
    use crate::http::testing::MockTransport;

    const ANIME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<anime id="979" restricted="false">
  <type>TV Series</type>
  <creators><name id="1" type="Direction">Mizushima Seiji</name></creators>
  <tags>
    <tag id="36" weight="300"><name>military</name><description>Rate limit of the army.</description></tag>
    <tag id="2604" weight="0"><name>Weekly Shounen Jump</name></tag>
    <tag id="12"><name>alchemy &amp; magic</name></tag>
    <tag id="13"><name>military</name></tag>
  </tags>
  <characters><character id="5"><name>Edward Elric</name></character></characters>
</anime>"#;

    fn quick_config() -> SourcesConfig {
        SourcesConfig {
            tag_min_spacing_ms: 0,
            tag_slow_spacing_ms: 0,
            ..SourcesConfig::default()
        }
    }

    #[test]
    fn test_parse_tag_names_reads_only_tag_names() {
        let names = parse_tag_names(ANIME_XML)
            .expect("valid xml")
            .expect("anime root present");
        assert_eq!(
            names,
            vec!["military", "Weekly Shounen Jump", "alchemy & magic"]
        );
        assert_eq!(
            parse_tag_names("<error code=\"302\">client version missing</error>")
                .expect("valid xml"),
            None
        );
    }

    #[test]
    fn test_ban_notice_detection_ignores_anime_documents() {
        assert!(is_ban_notice("<error>Banned</error>"));
        assert!(is_ban_notice("Too Many Requests, slow down"));
        assert!(!is_ban_notice(ANIME_XML));
        assert!(!is_ban_notice("<error>bank holiday</error>"));
        assert!(!is_ban_notice("   "));
    }

    #[test]
    fn test_ban_notice_suspends_requests_until_expiry() {
        let transport = Arc::new(MockTransport::new());
        transport
            .reply("aid=979", 200, "<error>Banned</error>")
            .reply("aid=979", 200, ANIME_XML);
        let client = TagClient::new(transport.clone(), &quick_config(), None);
        let cancel = CancellationFlag::new();
        let now = now_unix_ms();

        assert!(matches!(
            client.tags_at(979, &cancel, now),
            Err(SourceError::Banned { .. })
        ));
        assert_eq!(transport.calls(), 1);
        assert!(client.ban_notice().is_some());

        let skipped = settle_list(client.tags_at(979, &cancel, now + 60_000));
        assert!(skipped.is_empty());
        assert_eq!(transport.calls(), 1);

        let after_ban = now + 16 * 60 * 1000;
        let tags = client
            .tags_at(979, &cancel, after_ban)
            .expect("ban elapsed");
        assert_eq!(tags.len(), 3);
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn test_throttle_status_honors_retry_after() {
        let transport = Arc::new(MockTransport::new());
        transport.reply_with_retry_after("aid=1", 503, Duration::from_secs(120));
        let client = TagClient::new(transport.clone(), &quick_config(), None);
        let cancel = CancellationFlag::new();
        let now = now_unix_ms();

        match client.tags_at(1, &cancel, now) {
            Err(SourceError::Banned { until_unix_ms, .. }) => {
                assert_eq!(until_unix_ms, now + 120_000)
            }
            other => panic!("expected ban, got {other:?}"),
        }
        assert!(client.tags_at(2, &cancel, now + 119_000).is_err());
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_cached_tags_skip_network_and_expire_after_ttl() {
        let transport = Arc::new(MockTransport::new());
        transport.reply("aid=979", 200, ANIME_XML);
        let client = TagClient::new(transport.clone(), &quick_config(), None);
        let cancel = CancellationFlag::new();
        let now = now_unix_ms();

        client.tags_at(979, &cancel, now).expect("fetched");
        client.tags_at(979, &cancel, now + 1_000).expect("cached");
        assert_eq!(transport.calls(), 1);

        let six_days = 6 * 24 * 60 * 60 * 1000;
        client
            .tags_at(979, &cancel, now + six_days)
            .expect("refetched");
        assert_eq!(transport.calls(), 2);
        let request = &transport.requests()[0];
        assert!(request.contains("client=mediabrowser"));
        assert!(request.contains("protover=1"));
    }
}
