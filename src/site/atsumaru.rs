//! Atsumaru client (`atsu.moe`).
//!
//! The site exposes undocumented JSON endpoints: a paged trending feed, a
//! typed search index (hits wrapping documents, with weighted fields and
//! typo tolerances), a paged chapter feed, and a reader endpoint keyed by
//! both the series and chapter ids. All pagination upstream is 0-based;
//! the public contract is 1-based.
//!
//! Poster paths arrive bare, rooted, or already `static/`-prefixed
//! depending on the endpoint, so thumbnails are normalized before the
//! static-asset base is prepended.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::warn;

use super::{
    static_headers, MangaCard, MangaChapter, MangaClient, UpdateReport, SPOOFED_USER_AGENT,
};
use crate::http_client::FetchClient;

const SITE: &str = "atsumaru";
const BASE_URL: &str = "https://atsu.moe";

/// Type filter carried by the infinite-scroll feeds.
const TYPE_FILTER: &str = "Manga,Manwha,Manhua,OEL";

pub struct AtsumaruClient {
    http: Arc<FetchClient>,
    headers: HeaderMap,
}

impl AtsumaruClient {
    #[must_use]
    pub fn new(http: Arc<FetchClient>) -> Self {
        let headers = static_headers(&[
            ("accept", "*/*"),
            ("host", "atsu.moe"),
            ("user-agent", SPOOFED_USER_AGENT),
        ]);
        Self { http, headers }
    }

    async fn try_search(&self, query: &str, page: u32) -> Result<Vec<MangaCard>> {
        let entries = if query.is_empty() {
            // The trending feed stands in for an empty search.
            let url = format!(
                "{BASE_URL}/api/infinite/trending?page={}&types={TYPE_FILTER}",
                page.saturating_sub(1)
            );
            let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
            let feed: TrendingFeed =
                serde_json::from_str(&body).context("Failed to parse trending feed")?;
            feed.items
        } else {
            let url = format!(
                "{BASE_URL}/collections/manga/documents/search\
                 ?q={}\
                 &query_by=title,englishTitle,otherNames\
                 &limit=24\
                 &page={page}\
                 &query_by_weights=3,2,1\
                 &include_fields=id,title,englishTitle,poster\
                 &num_typos=4,3,2",
                urlencoding::encode(query)
            );
            let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
            let results: SearchResults =
                serde_json::from_str(&body).context("Failed to parse search results")?;
            results
                .hits
                .into_iter()
                .filter_map(|hit| hit.document)
                .collect()
        };

        Ok(entries.into_iter().filter_map(card_from_entry).collect())
    }

    async fn fetch_chapter_feed(&self, slug: &str, api_page: u32) -> Result<ChapterFeed> {
        let url = format!(
            "{BASE_URL}/api/manga/chapters?id={slug}&filter=all&sort=desc&page={api_page}"
        );
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
        serde_json::from_str(&body).context("Failed to parse chapter feed")
    }

    async fn try_chapters(&self, card: &MangaCard, page: u32) -> Result<Vec<MangaChapter>> {
        let slug = slug_from_url(&card.url);
        let feed = self.fetch_chapter_feed(slug, page.saturating_sub(1)).await?;
        Ok(shape_chapters(feed.chapters, slug, card))
    }

    async fn try_chapter_images(&self, final_url: &str) -> Result<Vec<String>> {
        // The reader page itself is not the data source; the API request is
        // keyed by the trailing /read/{slug}/{chapterId} segments of the
        // resolved URL.
        let mut tail = final_url.trim_end_matches('/').rsplit('/');
        let chapter_id = tail.next().context("No chapter id in reader URL")?;
        let slug = tail.next().context("No series id in reader URL")?;

        let url = format!(
            "{BASE_URL}/api/read/chapter?mangaId={slug}&chapterId={chapter_id}"
        );
        let (body, _) = self.http.fetch_text(&url, &self.headers).await?;
        let envelope: ReaderEnvelope =
            serde_json::from_str(&body).context("Failed to parse reader payload")?;

        Ok(envelope
            .read_chapter
            .pages
            .into_iter()
            .filter_map(|page| page.image)
            .map(|path| format!("{BASE_URL}{path}"))
            .collect())
    }
}

#[async_trait]
impl MangaClient for AtsumaruClient {
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
        url.starts_with("https://atsu.moe/")
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
        match self.try_chapters(card, page).await {
            Ok(chapters) => chapters,
            Err(e) => {
                warn!(site = SITE, error = %e, "chapter listing failed");
                Vec::new()
            }
        }
    }

    fn iter_chapters<'a>(&'a self, url: &'a str, name: &'a str) -> BoxStream<'a, MangaChapter> {
        let slug = slug_from_url(url).to_string();
        let card = MangaCard::new(SITE, name, url, "");

        let pages = stream::unfold((0u32, false), move |(api_page, done)| {
            let slug = slug.clone();
            let card = card.clone();
            async move {
                if done {
                    return None;
                }
                let feed = match self.fetch_chapter_feed(&slug, api_page).await {
                    Ok(feed) => feed,
                    Err(e) => {
                        warn!(site = SITE, error = %e, "chapter stream fetch failed");
                        return None;
                    }
                };
                // An empty page always terminates, even when the declared
                // page count disagrees.
                if feed.chapters.is_empty() {
                    return None;
                }
                let done = !has_next_page(api_page, feed.pages);
                let batch = shape_chapters(feed.chapters, &slug, &card);
                Some((stream::iter(batch), (api_page + 1, done)))
            }
        });

        Box::pin(pages.flatten())
    }

    async fn chapter_images(&self, _body: &[u8], final_url: &str) -> Vec<String> {
        match self.try_chapter_images(final_url).await {
            Ok(images) => images,
            Err(e) => {
                warn!(site = SITE, error = %e, "image resolution failed");
                Vec::new()
            }
        }
    }

    async fn check_updated(&self, previous: &[String]) -> UpdateReport {
        // The feed identifies series, not chapters, so nothing can be
        // confirmed updated from here; a reachable feed reports everything
        // for individual re-checking.
        let url = format!("{BASE_URL}/api/infinite/recentlyUpdated?page=0&types={TYPE_FILTER}");
        match self.http.fetch_text(&url, &self.headers).await {
            Ok((body, _)) if serde_json::from_str::<TrendingFeed>(&body).is_ok() => {
                UpdateReport::recheck_all(previous)
            }
            Ok(_) => {
                warn!(site = SITE, "update feed returned an unexpected payload");
                UpdateReport::empty()
            }
            Err(e) => {
                warn!(site = SITE, error = %e, "update check failed");
                UpdateReport::empty()
            }
        }
    }
}

/// Series id is the last path segment of the card URL.
fn slug_from_url(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

/// `Ch. {number} - {title}`, degrading cleanly when either side is missing.
fn chapter_label(number: &str, title: &str) -> String {
    match (number.is_empty(), title.is_empty()) {
        (true, _) => title.to_string(),
        (false, true) => format!("Ch. {number}"),
        (false, false) => format!("Ch. {number} - {title}"),
    }
}

/// Normalize a poster path that may arrive bare, rooted, or already
/// `static/`-prefixed, then root it under the static-asset base.
fn poster_url(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_prefix("static/").unwrap_or(path);
    format!("{BASE_URL}/static/{path}")
}

fn card_from_entry(entry: SeriesEntry) -> Option<MangaCard> {
    let thumbnail = entry.poster_path().map(poster_url).unwrap_or_default();
    let id = entry.id?;
    let title = entry.title.unwrap_or_default();
    Some(MangaCard::new(
        SITE,
        title,
        format!("{BASE_URL}/manga/{id}"),
        thumbnail,
    ))
}

fn shape_chapters(
    entries: Vec<ChapterEntry>,
    slug: &str,
    card: &MangaCard,
) -> Vec<MangaChapter> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id?;
            let title = entry.title.unwrap_or_default();
            let number = entry.number.map(|n| n.render()).unwrap_or_default();
            Some(MangaChapter::new(
                SITE,
                chapter_label(&number, &title),
                format!("{BASE_URL}/read/{slug}/{id}"),
                card.clone(),
            ))
        })
        .collect()
}

/// 0-based feed pagination: a next page exists while `page + 1 < pages`.
fn has_next_page(api_page: u32, declared_pages: u32) -> bool {
    api_page + 1 < declared_pages
}

// ============================================================================
// Atsumaru API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TrendingFeed {
    #[serde(default)]
    items: Vec<SeriesEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    document: Option<SeriesEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeriesEntry {
    id: Option<String>,
    title: Option<String>,
    poster: Option<PosterRef>,
    image: Option<PosterRef>,
}

impl SeriesEntry {
    /// First usable poster path, trying `poster` before `image`.
    fn poster_path(&self) -> Option<&str> {
        [self.poster.as_ref(), self.image.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(PosterRef::path)
            .find(|path| !path.is_empty())
    }
}

/// A poster reference is a bare path on some endpoints and a wrapping
/// object on others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PosterRef {
    Path(String),
    Object(PosterObject),
}

impl PosterRef {
    fn path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Object(object) => object.image.as_deref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PosterObject {
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChapterFeed {
    chapters: Vec<ChapterEntry>,
    pages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChapterEntry {
    id: Option<String>,
    title: Option<String>,
    number: Option<ChapterNumber>,
}

/// Chapter numbers arrive as strings or bare JSON numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChapterNumber {
    Text(String),
    Value(f64),
}

impl ChapterNumber {
    #[allow(clippy::cast_possible_truncation)]
    fn render(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Value(value) if value.fract() == 0.0 => format!("{}", *value as i64),
            Self::Value(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ReaderEnvelope {
    read_chapter: ReaderChapter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReaderChapter {
    pages: Vec<ReaderPage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReaderPage {
    image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poster_url_normalizes_all_shapes() {
        assert_eq!(
            poster_url("covers/x.jpg"),
            "https://atsu.moe/static/covers/x.jpg"
        );
        assert_eq!(
            poster_url("/covers/x.jpg"),
            "https://atsu.moe/static/covers/x.jpg"
        );
        assert_eq!(
            poster_url("static/covers/x.jpg"),
            "https://atsu.moe/static/covers/x.jpg"
        );
        assert_eq!(
            poster_url("/static/covers/x.jpg"),
            "https://atsu.moe/static/covers/x.jpg"
        );
    }

    #[test]
    fn chapter_label_degrades_without_number_or_title() {
        assert_eq!(chapter_label("12", "The Pit"), "Ch. 12 - The Pit");
        assert_eq!(chapter_label("", "The Pit"), "The Pit");
        assert_eq!(chapter_label("12", ""), "Ch. 12");
        assert_eq!(chapter_label("", ""), "");
    }

    #[test]
    fn slug_is_last_path_segment() {
        assert_eq!(slug_from_url("https://atsu.moe/manga/blue-lock"), "blue-lock");
        assert_eq!(slug_from_url("https://atsu.moe/manga/blue-lock/"), "blue-lock");
    }

    #[test]
    fn trending_feed_decodes_and_shapes_cards() {
        let body = r#"{
            "items": [
                {"id": "blue-lock", "title": "Blue Lock", "poster": "covers/bl.jpg"},
                {"id": "oshi", "title": "Oshi no Ko", "poster": {"image": "/static/covers/onk.jpg"}},
                {"title": "No id, dropped"}
            ]
        }"#;
        let feed: TrendingFeed = serde_json::from_str(body).unwrap();
        let cards: Vec<MangaCard> = feed.items.into_iter().filter_map(card_from_entry).collect();

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].url, "https://atsu.moe/manga/blue-lock");
        assert_eq!(cards[0].thumbnail, "https://atsu.moe/static/covers/bl.jpg");
        assert_eq!(cards[1].thumbnail, "https://atsu.moe/static/covers/onk.jpg");
    }

    #[test]
    fn search_hits_unwrap_documents() {
        let body = r#"{
            "hits": [
                {"document": {"id": "solo", "title": "Solo Camping"}},
                {"no_document": true}
            ]
        }"#;
        let results: SearchResults = serde_json::from_str(body).unwrap();
        let cards: Vec<MangaCard> = results
            .hits
            .into_iter()
            .filter_map(|hit| hit.document)
            .filter_map(card_from_entry)
            .collect();

        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "Solo Camping");
        assert!(cards[0].thumbnail.is_empty());
    }

    #[test]
    fn chapter_feed_shapes_labels_and_urls() {
        let body = r#"{
            "chapters": [
                {"id": "c9", "title": "Dream", "number": "9"},
                {"id": "c10", "title": "", "number": 10},
                {"id": "c0", "title": "Prologue"}
            ],
            "pages": 3
        }"#;
        let feed: ChapterFeed = serde_json::from_str(body).unwrap();
        let card = MangaCard::new(SITE, "X", "https://atsu.moe/manga/x", "");
        let chapters = shape_chapters(feed.chapters, "x", &card);

        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].name, "Ch. 9 - Dream");
        assert_eq!(chapters[0].url, "https://atsu.moe/read/x/c9");
        assert_eq!(chapters[1].name, "Ch. 10");
        assert_eq!(chapters[2].name, "Prologue");
    }

    #[test]
    fn produced_urls_satisfy_membership() {
        let client = AtsumaruClient::new(Arc::new(FetchClient::new().unwrap()));
        let card = card_from_entry(SeriesEntry {
            id: Some("x".to_string()),
            ..SeriesEntry::default()
        })
        .unwrap();
        assert!(client.contains_url(&card.url));

        let chapters = shape_chapters(
            vec![ChapterEntry {
                id: Some("c1".to_string()),
                ..ChapterEntry::default()
            }],
            "x",
            &card,
        );
        assert!(client.contains_url(&chapters[0].url));
    }

    #[test]
    fn reader_envelope_maps_pages_to_absolute_urls() {
        let body = r#"{
            "readChapter": {
                "pages": [
                    {"image": "/pages/1.jpg"},
                    {"noise": true},
                    {"image": "/pages/2.jpg"}
                ]
            }
        }"#;
        let envelope: ReaderEnvelope = serde_json::from_str(body).unwrap();
        let images: Vec<String> = envelope
            .read_chapter
            .pages
            .into_iter()
            .filter_map(|page| page.image)
            .map(|path| format!("{BASE_URL}{path}"))
            .collect();

        assert_eq!(
            images,
            [
                "https://atsu.moe/pages/1.jpg",
                "https://atsu.moe/pages/2.jpg"
            ]
        );
    }

    #[test]
    fn pagination_bound_terminates_even_when_declared_zero() {
        // A wrong or zero page count must not keep the stream alive.
        assert!(!has_next_page(0, 0));
        assert!(!has_next_page(0, 1));
        assert!(has_next_page(0, 2));
        assert!(!has_next_page(2, 3));
    }

    #[test]
    fn chapter_numbers_render_from_text_and_value() {
        assert_eq!(ChapterNumber::Text("10.5".to_string()).render(), "10.5");
        assert_eq!(ChapterNumber::Value(10.0).render(), "10");
        assert_eq!(ChapterNumber::Value(10.5).render(), "10.5");
    }
}
