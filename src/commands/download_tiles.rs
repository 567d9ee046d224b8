use anyhow::{Context, Result};
use std::fs::{create_dir_all, File};
use std::path::Path;
use tracing::info;

use crate::config::GridConfig;
use crate::fetcher::{build_client, fetch_all};

/// Saves the raw tiles of the grid to `<dir>/<column>/<row>.png` without merging them.
pub async fn download_tiles(config: &GridConfig, dir: &Path) -> Result<()> {
    let client = build_client(&config.fetch)?;
    let tiles = fetch_all(&client, &config.tiles(), &config.fetch).await?;
    for tile in &tiles {
        let tile_dir = dir.join(tile.column.to_string());
        create_dir_all(&tile_dir)
            .with_context(|| format!("write failed: cannot create {}", tile_dir.display()))?;
        let path = tile_dir.join(format!("{}.png", tile.row));
        let mut out = File::create(&path)
            .with_context(|| format!("write failed: cannot create {}", path.display()))?;
        std::io::copy(&mut tile.bytes.as_slice(), &mut out)
            .with_context(|| format!("write failed: cannot write {}", path.display()))?;
        info!(url = %tile.url, path = %path.display(), "saved tile");
    }
    info!(num_tiles = tiles.len(), dir = %dir.display(), "saved all tiles");
    Ok(())
}
