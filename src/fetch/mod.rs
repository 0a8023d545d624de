use anyhow::Result;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

/// Discovering CSV object URLs behind a source's feed list.
pub mod urls {
    use super::*;

    /// Resolve each feed to its downloadable CSV URLs. A feed URL that is
    /// itself a `.csv` is its own download link; anything else is treated
    /// as an index page and scraped for `.csv` anchors.
    pub async fn fetch_csv_urls(client: &Client, feeds: &[String]) -> Result<Vec<String>> {
        let selector =
            Selector::parse(r#"a[href$=".csv"]"#).expect("CSS selector for CSV links is valid");

        let mut found = Vec::new();
        for feed in feeds {
            if feed.to_lowercase().ends_with(".csv") {
                found.push(feed.clone());
                continue;
            }
            let base = Url::parse(feed)?;
            let html = client
                .get(feed)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            let doc = Html::parse_document(&html);
            found.extend(
                doc.select(&selector)
                    .filter_map(|e| e.value().attr("href"))
                    .filter_map(|href| base.join(href).ok())
                    .map(|u| u.to_string()),
            );
        }
        Ok(found)
    }
}

/// Downloading CSV objects into the local data directory.
pub mod files {
    use super::*;
    use std::path::{Path, PathBuf};
    use tokio::fs;

    /// Download `url_str` into `dest_dir`, keeping the remote filename so
    /// emitted records can carry it as provenance.
    pub async fn download_csv(
        client: &Client,
        url_str: &str,
        dest_dir: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let dest_dir = dest_dir.as_ref();
        let url = Url::parse(url_str)?;
        let filename = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty())
            .unwrap_or("download.csv");
        let dest_path = dest_dir.join(filename);

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let resp = client.get(url.as_str()).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?;
        fs::write(&dest_path, &bytes).await?;

        Ok(dest_path)
    }
}
