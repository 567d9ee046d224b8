use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use image::ImageFormat;
use reqwest::Client;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::config::{FetchConfig, TileSpec};

pub static USER_AGENT: &str = "tile-dumper/0.1";

/// Raw bytes of one tile as served, still encoded. The bytes are known to decode as PNG.
#[derive(Debug, Clone)]
pub struct FetchedTile {
    pub column: u32,
    pub row: u32,
    pub url: String,
    pub bytes: Vec<u8>,
}

pub fn build_client(config: &FetchConfig) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.timeout())
        .connect_timeout(config.connect_timeout())
        .build()?)
}

async fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let res = client.get(url).send().await?.error_for_status()?;
    info!(status = %res.status(), "fetched tile");
    let bytes = res.bytes().await?.to_vec();
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .context("response body is not a decodable PNG")?;
    Ok(bytes)
}

/// Downloads one tile, retrying up to `config.retries` times with a linearly growing pause.
#[instrument(skip(client, tile, config), fields(column = tile.column, row = tile.row, url = %tile.url))]
pub async fn fetch_tile(client: &Client, tile: &TileSpec, config: &FetchConfig) -> Result<FetchedTile> {
    let attempts = config.retries.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        info!(attempt, attempts, "downloading tile");
        match get_bytes(client, &tile.url).await {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "downloaded tile");
                return Ok(FetchedTile {
                    column: tile.column,
                    row: tile.row,
                    url: tile.url.clone(),
                    bytes,
                });
            }
            Err(err) => {
                warn!(attempt, attempts, error = %err, "failed to download tile");
                last_error = Some(err);
            }
        }
        if attempt < attempts {
            sleep(config.backoff() * attempt).await;
        }
    }
    let err = last_error.unwrap_or_else(|| anyhow!("no download attempts were made"));
    Err(err.context(format!(
        "fetch failed for tile ({}, {}) at {} after {} attempts",
        tile.column, tile.row, tile.url, attempts
    )))
}

/// Fetches every tile concurrently and only succeeds if all of them arrived.
#[instrument(skip(client, tiles, config), fields(num_tiles = tiles.len()))]
pub async fn fetch_all(
    client: &Client,
    tiles: &[TileSpec],
    config: &FetchConfig,
) -> Result<Vec<FetchedTile>> {
    let results = join_all(tiles.iter().map(|tile| fetch_tile(client, tile, config))).await;

    let mut fetched = Vec::with_capacity(tiles.len());
    let mut failures = Vec::new();
    for (tile, result) in tiles.iter().zip(results) {
        match result {
            Ok(fetched_tile) => fetched.push(fetched_tile),
            Err(err) => {
                error!(column = tile.column, row = tile.row, url = %tile.url, error = ?err, "missing tile");
                failures.push(format!("({}, {}) {}: {:#}", tile.column, tile.row, tile.url, err));
            }
        }
    }

    if !failures.is_empty() {
        bail!(
            "fetch failed for {} of {} tiles, all tiles are required:\n  {}",
            failures.len(),
            tiles.len(),
            failures.join("\n  ")
        );
    }
    info!(num_tiles = fetched.len(), "downloaded all tiles");
    Ok(fetched)
}
