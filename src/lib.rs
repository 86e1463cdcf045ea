//! `mangafetch` - site clients for manga aggregation sites
//!
//! Each supported site gets one client implementing a uniform contract:
//! search, chapter listing (bounded and lazy), image-list resolution, URL
//! membership, and a best-effort update check. The clients normalize
//! heterogeneous upstream shapes — JSON endpoints, AJAX envelopes wrapping
//! HTML fragments, inline-script array literals, tile-scrambled images —
//! into a small common surface.
//!
//! Scraping third-party markup is inherently brittle: every operation
//! degrades to an empty result rather than erroring, so one broken site
//! cannot take down an aggregate caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mangafetch::{ClientRegistry, FetchClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ClientRegistry::new(Arc::new(FetchClient::new()?));
//!     for client in registry.iter() {
//!         let cards = client.search("solo leveling", 1).await;
//!         println!("{}: {} results", client.site(), cards.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod descramble;
pub mod http_client;
pub mod site;

pub use http_client::{FetchClient, FetchError, FetchResponse};
pub use site::{
    ClientRegistry, MangaCard, MangaChapter, MangaClient, UpdateReport, PAGE_SIZE,
};

/// Version of mangafetch
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
