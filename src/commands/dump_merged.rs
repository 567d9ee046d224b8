use anyhow::Result;
use std::path::PathBuf;
use tokio::task::spawn_blocking;
use tracing::{info, info_span};

use crate::compositor::compose;
use crate::config::GridConfig;
use crate::dump::{self, write_dump};
use crate::fetcher::{build_client, fetch_all};

/// Runs the whole pipeline once: fetch every tile, merge them, write one dump.
///
/// Nothing is written unless every tile was fetched and decoded.
pub async fn dump_merged(config: &GridConfig) -> Result<PathBuf> {
    let started_at = dump::now(config.utc_offset_hours)?;
    let (original_width, original_height) = config.original_dimensions();
    let (width, height) = config.canvas_dimensions();
    info!(
        columns = config.columns,
        rows = config.rows,
        original_width,
        original_height,
        width,
        height,
        scale_factor = config.scale_factor,
        "starting tile dump, all {} tiles are required",
        config.total_tiles()
    );

    let client = build_client(&config.fetch)?;
    let tiles = fetch_all(&client, &config.tiles(), &config.fetch).await?;

    let config = config.clone();
    let span = info_span!("merge", started_at = %started_at);
    let path = spawn_blocking(move || {
        let _span = span.enter();
        let canvas = compose(&config, &tiles)?;
        write_dump(&canvas, &config.output_dir, &started_at)
    })
    .await??;

    info!(path = %path.display(), "dump stored");
    Ok(path)
}
