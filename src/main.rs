//! `mangafetch` CLI - probe the site clients by hand.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use mangafetch::{ClientRegistry, FetchClient, MangaCard, MangaClient};

#[derive(Parser)]
#[command(name = "mangafetch")]
#[command(about = "Probe manga site clients: search, chapters, images, update checks")]
#[command(version)]
struct Cli {
    /// Site key (atsumaru, mangafire, mangakatana)
    #[arg(short, long)]
    site: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the site; an empty query lists the default feed
    Search {
        #[arg(default_value = "")]
        query: String,

        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// List one page of a series' chapters
    Chapters {
        /// Series URL on the site
        url: String,

        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Stream every chapter of a series
    All {
        /// Series URL on the site
        url: String,
    },

    /// Resolve the image list of a chapter URL
    Images {
        /// Chapter URL on the site
        url: String,
    },

    /// Classify previously-seen chapter URLs against the update feed
    Check {
        /// Chapter URLs to classify
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let registry = ClientRegistry::new(Arc::new(FetchClient::new()?));
    let Some(client) = registry.get(&cli.site) else {
        let known: Vec<&str> = registry.iter().map(MangaClient::site).collect();
        anyhow::bail!("unknown site {:?} (expected one of: {})", cli.site, known.join(", "));
    };

    match cli.command {
        Commands::Search { query, page } => {
            for card in client.search(&query, page).await {
                println!("{}\t{}", card.name, card.url);
            }
        }

        Commands::Chapters { url, page } => {
            let card = MangaCard::new(client.site(), "", &url, "");
            for chapter in client.chapters(&card, page).await {
                println!("{}\t{}", chapter.name, chapter.url);
            }
        }

        Commands::All { url } => {
            let mut chapters = client.iter_chapters(&url, "");
            while let Some(chapter) = chapters.next().await {
                println!("{}\t{}", chapter.name, chapter.url);
            }
        }

        Commands::Images { url } => {
            let response = client.http().fetch(&url, client.default_headers()).await?;
            for image in client.chapter_images(&response.bytes, &response.final_url).await {
                println!("{image}");
            }
        }

        Commands::Check { urls } => {
            let report = client.check_updated(&urls).await;
            for url in &report.updated {
                println!("updated\t{url}");
            }
            for url in &report.not_updated {
                println!("not-updated\t{url}");
            }
        }
    }

    Ok(())
}
