use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

use crate::dump::utc_offset;

pub static DEFAULT_URL_TEMPLATE: &str = "https://backend.wplace.live/files/s0/tiles/{x}/{y}.png";
pub const DEFAULT_ORIGIN_X: u32 = 1664;
pub const DEFAULT_ORIGIN_Y: u32 = 1065;
pub const DEFAULT_TILE_SIZE: u32 = 1000;
pub const DEFAULT_SCALE_FACTOR: u32 = 2;
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

/// Where the URL for each grid cell comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileSource {
    /// `{x}` and `{y}` are replaced by `origin_x + column` and `origin_y + row`.
    Template {
        url_template: String,
        origin_x: u32,
        origin_y: u32,
    },
    /// Row-major table of URLs, `urls[row][column]`.
    List(Vec<Vec<String>>),
}

impl Default for TileSource {
    fn default() -> Self {
        TileSource::Template {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            origin_x: DEFAULT_ORIGIN_X,
            origin_y: DEFAULT_ORIGIN_Y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            retries: 5,
            backoff_ms: 1500,
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl FetchConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub columns: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub scale_factor: u32,
    pub output_dir: PathBuf,
    pub utc_offset_hours: i32,
    pub fetch: FetchConfig,
    pub tiles: TileSource,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            columns: 3,
            rows: 2,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            scale_factor: DEFAULT_SCALE_FACTOR,
            output_dir: PathBuf::from("output"),
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            fetch: FetchConfig::default(),
            tiles: TileSource::default(),
        }
    }
}

/// One cell of the grid and the URL its image is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSpec {
    pub column: u32,
    pub row: u32,
    pub url: String,
}

impl GridConfig {
    /// Reads a JSON config file if one is given, otherwise starts from the defaults.
    #[instrument(level = "debug")]
    pub fn load(path: Option<&Path>) -> Result<GridConfig> {
        match path {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let config: GridConfig = serde_json::from_str(&json)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            None => Ok(GridConfig::default()),
        }
    }

    /// Applies `SCALE_FACTOR` and `OUTPUT_DIR` overrides using `var` to look up values.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(scale_factor) = var("SCALE_FACTOR") {
            self.scale_factor = scale_factor
                .trim()
                .parse()
                .with_context(|| format!("SCALE_FACTOR is not a number: {:?}", scale_factor))?;
        }
        if let Some(output_dir) = var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(output_dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 || self.rows == 0 {
            bail!("grid must have at least one column and one row");
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            bail!("tile width and height must be non-zero");
        }
        if self.scale_factor == 0 {
            bail!("scale factor must be at least 1");
        }
        match &self.tiles {
            TileSource::Template {
                url_template,
                origin_x,
                origin_y,
            } => {
                if !url_template.contains("{x}") && !url_template.contains("{y}") {
                    bail!(
                        "url template {:?} contains neither {{x}} nor {{y}}",
                        url_template
                    );
                }
                if origin_x.checked_add(self.columns - 1).is_none()
                    || origin_y.checked_add(self.rows - 1).is_none()
                {
                    bail!(
                        "tile origin ({}, {}) puts a {}x{} grid past the largest tile coordinate",
                        origin_x,
                        origin_y,
                        self.columns,
                        self.rows
                    );
                }
            }
            TileSource::List(urls) => {
                if urls.len() != self.rows as usize {
                    bail!(
                        "url list has {} rows but the grid has {}",
                        urls.len(),
                        self.rows
                    );
                }
                for (row, row_urls) in urls.iter().enumerate() {
                    if row_urls.len() != self.columns as usize {
                        bail!(
                            "url list row {} has {} urls but the grid has {} columns",
                            row,
                            row_urls.len(),
                            self.columns
                        );
                    }
                }
            }
        }
        utc_offset(self.utc_offset_hours)?;
        self.checked_canvas_dimensions()?;
        Ok(())
    }

    pub fn total_tiles(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn scaled_tile_dimensions(&self) -> (u32, u32) {
        (
            self.tile_width * self.scale_factor,
            self.tile_height * self.scale_factor,
        )
    }

    /// Size of the merged grid before enlargement.
    pub fn original_dimensions(&self) -> (u32, u32) {
        (self.columns * self.tile_width, self.rows * self.tile_height)
    }

    pub fn canvas_dimensions(&self) -> (u32, u32) {
        let (width, height) = self.original_dimensions();
        (width * self.scale_factor, height * self.scale_factor)
    }

    fn checked_canvas_dimensions(&self) -> Result<(u32, u32)> {
        let overflow = || anyhow!("canvas dimensions overflow u32");
        let width = self
            .columns
            .checked_mul(self.tile_width)
            .and_then(|w| w.checked_mul(self.scale_factor))
            .ok_or_else(overflow)?;
        let height = self
            .rows
            .checked_mul(self.tile_height)
            .and_then(|h| h.checked_mul(self.scale_factor))
            .ok_or_else(overflow)?;
        Ok((width, height))
    }

    /// Row-major table of every tile in the grid.
    pub fn tiles(&self) -> Vec<TileSpec> {
        let mut tiles = Vec::with_capacity(self.total_tiles());
        for row in 0..self.rows {
            for column in 0..self.columns {
                let url = match &self.tiles {
                    TileSource::Template {
                        url_template,
                        origin_x,
                        origin_y,
                    } => url_template
                        .replace("{x}", &(origin_x + column).to_string())
                        .replace("{y}", &(origin_y + row).to_string()),
                    TileSource::List(urls) => urls[row as usize][column as usize].clone(),
                };
                tiles.push(TileSpec { column, row, url });
            }
        }
        tiles
    }
}
