//! Site clients for manga aggregation sites.
//!
//! Each module implements the same contract against one external site:
//! search, chapter listing (bounded and lazy), image-list resolution, URL
//! membership, and a best-effort update check. The sites share nothing
//! upstream — one speaks JSON endpoints, one hides its chapter list behind
//! an AJAX envelope, one embeds its image list in inline script text — so
//! every client normalizes its own wire format into [`MangaCard`] and
//! [`MangaChapter`].
//!
//! # Architecture
//!
//! - [`MangaClient`]: async trait, one concrete implementation per site
//! - [`ClientRegistry`]: dispatches URLs to the owning client
//! - [`MangaCard`] / [`MangaChapter`]: the shared value shapes
//!
//! Every operation degrades to an empty result on transport or parse
//! failure. A broken selector on one site must read as "nothing found",
//! never as an error that aborts an aggregate multi-site caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mangafetch::{ClientRegistry, FetchClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = ClientRegistry::new(Arc::new(FetchClient::new()?));
//!
//! if let Some(client) = registry.for_url("https://mangakatana.com/manga/some-title") {
//!     let cards = client.search("some title", 1).await;
//!     println!("{} results from {}", cards.len(), client.site());
//! }
//! # Ok(())
//! # }
//! ```

pub mod atsumaru;
pub mod mangafire;
pub mod mangakatana;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::http_client::FetchClient;

/// Chapters per page when a site returns its full list in one response.
pub const PAGE_SIZE: usize = 20;

/// Browser identity sent by every client; the sites refuse obvious bots.
pub(crate) const SPOOFED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36";

/// A discovered series entry from search or a listing feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangaCard {
    /// Site key of the client that produced this card.
    pub site: &'static str,
    pub name: String,
    /// Site-absolute URL; satisfies the producing client's `contains_url`.
    pub url: String,
    /// Possibly empty when the listing carries no cover.
    pub thumbnail: String,
}

impl MangaCard {
    #[must_use]
    pub fn new(
        site: &'static str,
        name: impl Into<String>,
        url: impl Into<String>,
        thumbnail: impl Into<String>,
    ) -> Self {
        Self {
            site,
            name: name.into(),
            url: url.into(),
            thumbnail: thumbnail.into(),
        }
    }
}

/// One chapter belonging to a [`MangaCard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangaChapter {
    pub site: &'static str,
    /// Display label, shaped per site from the raw number and title.
    pub name: String,
    pub url: String,
    pub manga: MangaCard,
    /// Pre-resolved image URLs; usually empty until the caller asks
    /// [`MangaClient::chapter_images`].
    pub images: Vec<String>,
}

impl MangaChapter {
    #[must_use]
    pub fn new(site: &'static str, name: impl Into<String>, url: impl Into<String>, manga: MangaCard) -> Self {
        Self {
            site,
            name: name.into(),
            url: url.into(),
            manga,
            images: Vec::new(),
        }
    }
}

/// Classification of previously-known chapter URLs against a site's
/// recently-updated surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub not_updated: Vec<String>,
}

impl UpdateReport {
    /// The failure shape: nothing classified either way.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The escape valve for sites whose update feed cannot be correlated to
    /// chapter URLs: nothing confirmed updated, everything up for re-check.
    #[must_use]
    pub fn recheck_all(previous: &[String]) -> Self {
        Self {
            updated: Vec::new(),
            not_updated: previous.to_vec(),
        }
    }

    /// Classify `previous` URLs by membership in a freshly scraped set.
    #[must_use]
    pub fn classify(previous: &[String], recent: &HashSet<String>) -> Self {
        let mut report = Self::default();
        for url in previous {
            if recent.contains(url) {
                report.updated.push(url.clone());
            } else {
                report.not_updated.push(url.clone());
            }
        }
        report
    }
}

/// One site's implementation of the extraction contract.
///
/// Implementations hold exactly two pieces of shared state: a reference to
/// the fetch primitive and a static default header map. Every method call is
/// independent; nothing is cached between calls.
#[async_trait]
pub trait MangaClient: Send + Sync {
    /// Stable site key, e.g. `"mangakatana"`.
    fn site(&self) -> &'static str;

    fn base_url(&self) -> &'static str;

    fn http(&self) -> &FetchClient;

    /// Static headers sent with every request this client makes.
    fn default_headers(&self) -> &HeaderMap;

    /// Whether `url` belongs to this site. Pure string test, no network.
    fn contains_url(&self, url: &str) -> bool;

    /// Search the site. An empty query returns the site's default listing
    /// (trending or latest), never an error. Malformed upstream payloads
    /// yield an empty vec.
    async fn search(&self, query: &str, page: u32) -> Vec<MangaCard>;

    /// Chapters of `card` for a 1-based `page`. Sites that return their
    /// full list in one response are sliced to [`PAGE_SIZE`] entries.
    async fn chapters(&self, card: &MangaCard, page: u32) -> Vec<MangaChapter>;

    /// Lazily stream every chapter of the series at `url`.
    ///
    /// Each call restarts from the first page. The stream ends when a
    /// fetched page yields no chapters, regardless of what the site's
    /// has-more signal claims, so a lying pagination field cannot make it
    /// spin forever. Dropping the stream abandons it; nothing is held
    /// beyond the fetch client's connection pool.
    fn iter_chapters<'a>(&'a self, url: &'a str, name: &'a str) -> BoxStream<'a, MangaChapter>;

    /// Resolve the ordered image URLs of a chapter, given the fetched body
    /// of its URL and the post-redirect URL it was served from. Returns an
    /// empty vec when the extraction heuristic fails.
    async fn chapter_images(&self, body: &[u8], final_url: &str) -> Vec<String>;

    /// Classify previously-seen chapter URLs against the site's
    /// recently-updated surface. `([], [])` on failure; `([], previous)`
    /// when the surface only identifies series, not chapters.
    async fn check_updated(&self, previous: &[String]) -> UpdateReport;

    /// Fetch one asset's raw bytes with this client's default headers.
    /// Transport failure degrades to an empty buffer.
    async fn download_asset(&self, url: &str) -> Vec<u8> {
        match self.http().fetch(url, self.default_headers()).await {
            Ok(response) => response.bytes,
            Err(e) => {
                tracing::warn!(site = self.site(), %url, error = %e, "asset download failed");
                Vec::new()
            }
        }
    }
}

/// Routes URLs to the owning site client.
///
/// Clients are checked in registration order; first match wins.
pub struct ClientRegistry {
    clients: Vec<Box<dyn MangaClient>>,
}

impl ClientRegistry {
    /// Create a registry with all available site clients sharing one
    /// fetch client.
    #[must_use]
    pub fn new(http: Arc<FetchClient>) -> Self {
        let clients: Vec<Box<dyn MangaClient>> = vec![
            Box::new(atsumaru::AtsumaruClient::new(Arc::clone(&http))),
            Box::new(mangafire::MangaFireClient::new(Arc::clone(&http))),
            Box::new(mangakatana::MangaKatanaClient::new(http)),
        ];

        Self { clients }
    }

    /// The client whose site owns `url`, if any.
    #[must_use]
    pub fn for_url(&self, url: &str) -> Option<&dyn MangaClient> {
        self.clients
            .iter()
            .find(|client| client.contains_url(url))
            .map(Box::as_ref)
    }

    /// The client registered under `site`, if any.
    #[must_use]
    pub fn get(&self, site: &str) -> Option<&dyn MangaClient> {
        self.clients
            .iter()
            .find(|client| client.site() == site)
            .map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn MangaClient> {
        self.clients.iter().map(Box::as_ref)
    }
}

/// Slice a full listing down to a 1-based page of [`PAGE_SIZE`] entries.
pub(crate) fn paginate<T>(all: Vec<T>, page: u32) -> Vec<T> {
    let start = (page.saturating_sub(1) as usize).saturating_mul(PAGE_SIZE);
    all.into_iter().skip(start).take(PAGE_SIZE).collect()
}

/// Build a header map from static lowercase name/value pairs.
pub(crate) fn static_headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers
}

/// Resolve `href` against `base`, mirroring how a browser would.
pub(crate) fn absolutize(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}
