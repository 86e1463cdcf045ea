//! MangaFire client (`mangafire.to`).
//!
//! Listings are plain HTML behind the `/filter` page. The chapter list is
//! only reachable through an AJAX endpoint whose JSON envelope wraps
//! another HTML fragment, parsed structurally a second time. Page images
//! are served scrambled; [`MangaClient::download_asset`] is overridden
//! here to reverse the tile shuffle when an image URL carries a
//! `#scrambled_{offset}` token.
//!
//! # Known limitation
//!
//! Resolving a chapter's image list requires executing the reader's
//! client-side script, which computes the hidden numeric id the
//! `ajax/read` call is keyed by. Static parsing cannot recover it, so
//! [`MangaClient::chapter_images`] always returns an empty list for this
//! site rather than guessing.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{
    absolutize, paginate, static_headers, MangaCard, MangaChapter, MangaClient, UpdateReport,
    SPOOFED_USER_AGENT,
};
use crate::descramble::descramble;
use crate::http_client::FetchClient;

const SITE: &str = "mangafire";
const BASE_URL: &str = "https://mangafire.to";

/// Chapter language requested from the AJAX endpoint.
const LANG: &str = "en";

/// Marker appended out-of-band to scrambled image URLs.
const SCRAMBLE_MARKER: &str = "#scrambled_";

pub struct MangaFireClient {
    http: Arc<FetchClient>,
    headers: HeaderMap,
}

impl MangaFireClient {
    #[must_use]
    pub fn new(http: Arc<FetchClient>) -> Self {
        let headers = static_headers(&[
            ("user-agent", SPOOFED_USER_AGENT),
            ("referer", "https://mangafire.to/"),
            ("origin", "https://mangafire.to"),
        ]);
        Self { http, headers }
    }

    async fn try_search(&self, query: &str, page: u32) -> Result<Vec<MangaCard>> {
        // The filter page doubles as the default listing when the keyword
        // is empty.
        let keyword = query.trim().replace(' ', "+");
        let url = format!("{BASE_URL}/filter?keyword={keyword}&page={page}");
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
        cards_from_listing(&body)
    }

    /// The AJAX endpoint returns every chapter in one envelope.
    async fn fetch_all_chapters(
        &self,
        manga_url: &str,
        card: &MangaCard,
    ) -> Result<Vec<MangaChapter>> {
        let id = manga_id_from_url(manga_url).context("No manga id in URL")?;
        let url = format!("{BASE_URL}/ajax/manga/{id}/chapter/{LANG}");
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
        chapters_from_envelope(&body, card)
    }

    async fn try_check_updated(&self, previous: &[String]) -> Result<UpdateReport> {
        let url = format!("{BASE_URL}/filter?sort=recently_updated");
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;

        let recent: HashSet<String> = cards_from_listing(&body)?
            .into_iter()
            .map(|card| card.url)
            .collect();

        Ok(UpdateReport::classify(previous, &recent))
    }
}

#[async_trait]
impl MangaClient for MangaFireClient {
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
        url.contains("mangafire.to")
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

    async fn chapter_images(&self, _body: &[u8], _final_url: &str) -> Vec<String> {
        // The reader computes its ajax/read chapter id in script; there is
        // nothing static to derive the request from.
        debug!(
            site = SITE,
            "image resolution needs client-side script execution; returning no pages"
        );
        Vec::new()
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

    async fn download_asset(&self, url: &str) -> Vec<u8> {
        let (target, offset) = split_scramble_token(url);
        let bytes = match self.http.fetch(target, &self.headers).await {
            Ok(response) => response.bytes,
            Err(e) => {
                warn!(site = SITE, url = target, error = %e, "asset download failed");
                return Vec::new();
            }
        };

        match offset {
            Some(offset) => descramble(&bytes, offset),
            None => bytes,
        }
    }
}

/// Split a `#scrambled_{offset}` token off an asset URL. A malformed
/// offset still strips the marker and fetches the image as-is.
fn split_scramble_token(url: &str) -> (&str, Option<i64>) {
    match url.split_once(SCRAMBLE_MARKER) {
        Some((target, tail)) => (target, tail.parse().ok()),
        None => (url, None),
    }
}

/// Manga id is the suffix after the final `.` in the URL path.
fn manga_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let path = parsed.path();
    Some(path.rsplit('.').next().unwrap_or(path).to_string())
}

/// `Chapter {number}: {title}` with the degenerate forms cleaned up the
/// way the site's own labels need: no `"Chapter :"`, no trailing colon.
fn chapter_label(number: &str, title: &str) -> String {
    let label = if number.is_empty() {
        title.to_string()
    } else {
        format!("Chapter {number}: {title}")
    };
    let label = label.replace("Chapter :", "Chapter");
    label.trim().trim_end_matches(':').trim_end().to_string()
}

/// Parse filter/listing markup into cards.
fn cards_from_listing(html: &str) -> Result<Vec<MangaCard>> {
    let document = Html::parse_document(html);
    let unit = Selector::parse(".original.card-lg .unit .inner")
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let info = Selector::parse(".info > a").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let img = Selector::parse("img").map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let mut cards = Vec::new();
    for element in document.select(&unit) {
        let Some(link) = element.select(&info).next() else {
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

        cards.push(MangaCard::new(
            SITE,
            name,
            absolutize(BASE_URL, href),
            thumbnail,
        ));
    }
    Ok(cards)
}

/// Decode the AJAX envelope and parse the HTML fragment inside it.
fn chapters_from_envelope(body: &str, card: &MangaCard) -> Result<Vec<MangaChapter>> {
    let envelope: ChapterEnvelope =
        serde_json::from_str(body).context("Failed to parse chapter envelope")?;
    anyhow::ensure!(
        envelope.status == 200,
        "chapter endpoint returned status {}",
        envelope.status
    );
    chapters_from_fragment(&envelope.result, card)
}

fn chapters_from_fragment(fragment: &str, card: &MangaCard) -> Result<Vec<MangaChapter>> {
    let document = Html::parse_fragment(fragment);
    let item = Selector::parse("li.item").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let link = Selector::parse("a").map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let span = Selector::parse("span").map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let mut chapters = Vec::new();
    for row in document.select(&item) {
        let Some(anchor) = row.select(&link).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let number = row.value().attr("data-number").unwrap_or_default();
        let title = row
            .select(&span)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        chapters.push(MangaChapter::new(
            SITE,
            chapter_label(number, &title),
            absolutize(BASE_URL, href),
            card.clone(),
        ));
    }
    Ok(chapters)
}

// ============================================================================
// MangaFire AJAX Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChapterEnvelope {
    status: u16,
    result: String,
}
