//! MangaKatana client (`mangakatana.com`).
//!
//! Listings and chapter tables are static HTML. The reader page embeds its
//! image list in inline script as a single-quoted array literal; the
//! variable holding it changes name per deploy, so extraction first finds
//! the name via the `data-src` marker the reader wires it to, then the
//! array assignment itself. Either pattern going missing degrades to an
//! empty list.

use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use tracing::warn;

use super::{
    paginate, static_headers, MangaCard, MangaChapter, MangaClient, UpdateReport,
    SPOOFED_USER_AGENT,
};
use crate::http_client::FetchClient;

const SITE: &str = "mangakatana";
const BASE_URL: &str = "https://mangakatana.com";

/// The reader script passes the image array to a `data-src` setter; the
/// identifier that follows the attribute token is the array's name.
static IMAGE_VAR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-src['"],\s*(\w+)"#).unwrap());

static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'([^']*)'").unwrap());

pub struct MangaKatanaClient {
    http: Arc<FetchClient>,
    headers: HeaderMap,
}

impl MangaKatanaClient {
    #[must_use]
    pub fn new(http: Arc<FetchClient>) -> Self {
        let headers = static_headers(&[
            ("user-agent", SPOOFED_USER_AGENT),
            ("referer", "https://mangakatana.com"),
        ]);
        Self { http, headers }
    }

    async fn try_search(&self, query: &str, page: u32) -> Result<Vec<MangaCard>> {
        // The bare page listing is the site's latest-updates feed; it
        // stands in for an empty search.
        let url = if query.is_empty() {
            format!("{BASE_URL}/page/{page}")
        } else {
            format!(
                "{BASE_URL}/page/{page}?search={}&search_by=book_name",
                urlencoding::encode(query)
            )
        };
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
        cards_from_listing(&body)
    }

    async fn fetch_all_chapters(
        &self,
        manga_url: &str,
        card: &MangaCard,
    ) -> Result<Vec<MangaChapter>> {
        let (body, _) = self.http.fetch_text(manga_url, &self.headers).await?;
        chapters_from_page(&body, card)
    }

    async fn try_check_updated(&self, previous: &[String]) -> Result<UpdateReport> {
        let url = format!("{BASE_URL}/page/1");
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;

        let recent: std::collections::HashSet<String> = cards_from_listing(&body)?
            .into_iter()
            .map(|card| card.url)
            .collect();

        Ok(UpdateReport::classify(previous, &recent))
    }
}

#[async_trait]
impl MangaClient for MangaKatanaClient {
    fn site(&self) -> &'static str {
        SITE
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn http(&self) -> &FetchClient {
        &self.http
    }

    fn default_headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn contains_url(&self, url: &str) -> bool {
        url.starts_with(BASE_URL)
    }

    async fn search(&self, query: &str, page: u32) -> Vec<MangaCard> {
        match self.try_search(query, page).await {
            Ok(cards) => cards,
            Err(e) => {
                warn!(site = SITE, error = %e, "search failed");
                Vec::new()
            }
        }
    }

    async fn chapters(&self, card: &MangaCard, page: u32) -> Vec<MangaChapter> {
        match self.fetch_all_chapters(&card.url, card).await {
            Ok(all) => paginate(all, page),
            Err(e) => {
                warn!(site = SITE, error = %e, "chapter listing failed");
                Vec::new()
            }
        }
    }

    fn iter_chapters<'a>(&'a self, url: &'a str, name: &'a str) -> BoxStream<'a, MangaChapter> {
        let all = async move {
            let card = MangaCard::new(SITE, name, url, "");
            match self.fetch_all_chapters(url, &card).await {
                Ok(chapters) => chapters,
                Err(e) => {
                    warn!(site = SITE, error = %e, "chapter stream fetch failed");
                    Vec::new()
                }
            }
        };
        Box::pin(all.into_stream().map(stream::iter).flatten())
    }

    async fn chapter_images(&self, body: &[u8], _final_url: &str) -> Vec<String> {
        let html = String::from_utf8_lossy(body);
        image_urls_from_scripts(&html)
    }

    async fn check_updated(&self, previous: &[String]) -> UpdateReport {
        match self.try_check_updated(previous).await {
            Ok(report) => report,
            Err(e) => {
                warn!(site = SITE, error = %e, "update check failed");
                UpdateReport::empty()
            }
        }
    }
}

/// Extract the reader's image array from inline script text.
///
/// Both lookups fail closed: a missing marker or a missing array
/// assignment returns an empty list, since a reader-script layout change
/// must read as "no pages", not an error.
fn image_urls_from_scripts(html: &str) -> Vec<String> {
    let Some(var_name) = IMAGE_VAR_MARKER
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
    else {
        return Vec::new();
    };

    let assignment = match Regex::new(&format!(r"var {}=\[([^\]]*)\]", regex::escape(var_name))) {
        Ok(pattern) => pattern,
        Err(_) => return Vec::new(),
    };
    let Some(array_body) = assignment
        .captures(html)
        .and_then(|captures| captures.get(1))
    else {
        return Vec::new();
    };

    SINGLE_QUOTED
        .captures_iter(array_body.as_str())
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Parse a `#book_list` listing page into cards.
fn cards_from_listing(html: &str) -> Result<Vec<MangaCard>> {
    let document = Html::parse_document(html);
    let item = Selector::parse("div#book_list > div.item").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let title_link = Selector::parse("div.text > h3 > a").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let img = Selector::parse("img").map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let mut cards = Vec::new();
    for element in document.select(&item) {
        let Some(link) = element.select(&title_link).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let name = link.text().collect::<String>().trim().to_string();
        let thumbnail = element
            .select(&img)
            .next()
            .and_then(|image| image.value().attr("src"))
            .unwrap_or_default();

        cards.push(MangaCard::new(SITE, name, href, thumbnail));
    }
    Ok(cards)
}

/// Parse a manga page's chapter rows.
fn chapters_from_page(html: &str, card: &MangaCard) -> Result<Vec<MangaChapter>> {
    let document = Html::parse_document(html);
    let row = Selector::parse(".chapter").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let link = Selector::parse("a").map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let mut chapters = Vec::new();
    for element in document.select(&row) {
        let Some(anchor) = element.select(&link).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let name = anchor.text().collect::<String>().trim().to_string();
        chapters.push(MangaChapter::new(SITE, name, href, card.clone()));
    }
    Ok(chapters)
}
