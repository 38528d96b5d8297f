//! Fetching and reading feeds and web pages
//!
//! Feeds (RSS, Atom, JSON Feed) are parsed with `feed-rs` into the small
//! `ParsedFeed` shape the ingestor works with. HTML pages are only read
//! for feed autodiscovery and fallback metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::AppError;
use crate::federation::url_guard::check_outbound_url;
use crate::metrics::FEED_FETCH_DURATION_SECONDS;

static ALTERNATE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("link[rel~='alternate']").expect("[Bug] Failed to parse alternate link selector")
});
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("[Bug] Failed to parse title selector"));
static DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[name='description']")
        .expect("[Bug] Failed to parse description meta selector")
});
static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a").expect("[Bug] Failed to parse link HTML selector"));

static TEXT_ONLY: Lazy<ammonia::Builder<'static>> = Lazy::new(|| {
    let mut builder = ammonia::Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    builder
});

const RSS_TYPE: &str = "application/rss+xml";
const ATOM_TYPE: &str = "application/atom+xml";

/// One item of a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub guid: String,
    pub link: String,
    /// May contain HTML
    pub title: String,
    /// May contain HTML
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// A feed reduced to what the ingestor needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub feed_url: String,
    /// The site the feed belongs to; the feed URL if the feed names none
    pub site_url: String,
    pub title: String,
    pub description: String,
    pub generator: Option<String>,
    pub items: Vec<FeedItem>,
}

/// Loads raw documents from the web
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError>;
}

/// `reqwest`-backed fetcher with a bounded timeout
///
/// Local and private destinations are refused unless `allow_private_hosts`
/// is set.
pub struct HttpPageFetcher {
    http_client: reqwest::Client,
    timeout: Duration,
    allow_private_hosts: bool,
}

impl HttpPageFetcher {
    pub fn new(http_client: reqwest::Client, timeout: Duration, allow_private_hosts: bool) -> Self {
        Self {
            http_client,
            timeout,
            allow_private_hosts,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let target = check_outbound_url(url, self.allow_private_hosts)
            .await
            .map_err(|e| match e {
                AppError::Federation(message) => AppError::Feed(message),
                other => other,
            })?;

        let timer = FEED_FETCH_DURATION_SECONDS
            .with_label_values(&["http"])
            .start_timer();

        let response = self
            .http_client
            .get(target)
            .header(
                "Accept",
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/html;q=0.8, */*;q=0.5",
            )
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::Feed(format!("Failed to get {}: {}", url, e)))?;

        if !response.status().is_success() {
            timer.observe_duration();
            return Err(AppError::Feed(format!(
                "Request for {} failed with status {}",
                url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Feed(format!("Failed to read {}: {}", url, e)))?;
        timer.observe_duration();

        Ok(body.to_vec())
    }
}

/// Parse a document as a feed
///
/// # Errors
/// `AppError::Feed` if the document is not a feed
pub fn parse_feed(feed_url: &str, body: &[u8]) -> Result<ParsedFeed, AppError> {
    let feed = feed_rs::parser::parse(body)
        .map_err(|e| AppError::Feed(format!("Not a feed: {}: {}", feed_url, e)))?;

    let site_url = feed
        .links
        .iter()
        .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .map(|link| link.href.clone())
        .filter(|href| !href.is_empty())
        .unwrap_or_else(|| feed_url.to_string());

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
                .or_else(|| entry.links.first())
                .map(|link| link.href.clone())
                .unwrap_or_default();
            let description = entry
                .summary
                .map(|text| text.content)
                .or_else(|| entry.content.and_then(|content| content.body))
                .unwrap_or_default();

            FeedItem {
                guid: entry.id,
                link,
                title: entry.title.map(|text| text.content).unwrap_or_default(),
                description,
                published: entry.published,
                updated: entry.updated,
            }
        })
        .collect();

    Ok(ParsedFeed {
        feed_url: feed_url.to_string(),
        site_url,
        title: feed.title.map(|text| text.content).unwrap_or_default(),
        description: feed.description.map(|text| text.content).unwrap_or_default(),
        generator: feed.generator.map(|generator| generator.content),
        items,
    })
}

/// Find the feed a page advertises, as an absolute URL
///
/// RSS wins over Atom when a page offers both.
pub fn discover_feed_url(page_url: &str, html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let mut atom = None;
    let mut rss = None;

    for element in document.select(&ALTERNATE_SELECTOR) {
        let (Some(kind), Some(href)) = (element.value().attr("type"), element.value().attr("href"))
        else {
            continue;
        };
        match kind.trim().to_ascii_lowercase().as_str() {
            RSS_TYPE if rss.is_none() => rss = Some(href.trim().to_string()),
            ATOM_TYPE if atom.is_none() => atom = Some(href.trim().to_string()),
            _ => {}
        }
    }

    let href = rss.or(atom)?;
    let base = url::Url::parse(page_url).ok()?;
    let absolute = base.join(&href).ok()?;
    Some(absolute.as_str().trim_end_matches('/').to_string())
}

/// Page `<title>` and `<meta name="description">`, if present
pub fn page_metadata(html: &str) -> (Option<String>, Option<String>) {
    let document = Html::parse_document(html);
    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty());
    let description = document
        .select(&DESCRIPTION_SELECTOR)
        .next()
        .and_then(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty());
    (title, description)
}

/// Every `href` in an HTML fragment, skipping mention and hashtag links
pub fn links_from_fragment(fragment: &str) -> Vec<String> {
    let parsed_fragment = Html::parse_fragment(fragment);

    parsed_fragment
        .select(&ANCHOR_SELECTOR)
        .filter(|element| {
            !element
                .value()
                .classes()
                .any(|class| class == "mention" || class == "hashtag")
        })
        .filter_map(|element| element.value().attr("href").map(ToString::to_string))
        .collect()
}

/// Plain text of an HTML snippet: tags removed, entities decoded, trimmed
pub fn strip_html(html: &str) -> String {
    let text = TEXT_ONLY.clean(html).to_string();
    html_escape::decode_html_entities(&text).trim().to_string()
}

/// Whether the generator names a platform that federates on its own
pub fn is_native_generator(generator: Option<&str>, native_tokens: &[String]) -> bool {
    let Some(generator) = generator else {
        return false;
    };
    let generator = generator.to_lowercase();
    native_tokens
        .iter()
        .any(|token| !token.is_empty() && generator.contains(token.as_str()))
}

/// Feeds that must never be bridged
#[async_trait]
pub trait BlockedFeeds: Send + Sync {
    async fn is_blocked(&self, url: &str) -> Result<bool, AppError>;
}

/// Blocks configured domains and their subdomains
pub struct DomainBlockList {
    domains: Vec<String>,
}

impl DomainBlockList {
    pub fn new(domains: &[String]) -> Self {
        Self {
            domains: domains
                .iter()
                .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl BlockedFeeds for DomainBlockList {
    async fn is_blocked(&self, url: &str) -> Result<bool, AppError> {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
        else {
            return Ok(false);
        };

        Ok(self
            .domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}"))))
    }
}
