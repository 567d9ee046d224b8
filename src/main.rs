use anyhow::{Context, Result};
use argh::FromArgs;
use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod compositor;
mod config;
mod dump;
mod fetcher;
#[cfg(test)]
mod test_server;

use commands::{download_tiles, dump_merged, print_config};
use config::{
    GridConfig, TileSource, DEFAULT_ORIGIN_X, DEFAULT_ORIGIN_Y, DEFAULT_URL_TEMPLATE,
};

#[derive(FromArgs)]
/// Downloads a fixed grid of map tiles and saves them merged into one timestamped PNG
struct Args {
    /// path to a JSON config file, every field is optional
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// number of tile columns in the grid
    #[argh(option)]
    columns: Option<u32>,

    /// number of tile rows in the grid
    #[argh(option)]
    rows: Option<u32>,

    /// width in pixels of every source tile
    #[argh(option)]
    tile_width: Option<u32>,

    /// height in pixels of every source tile
    #[argh(option)]
    tile_height: Option<u32>,

    /// integer factor each tile pixel is enlarged by (overrides SCALE_FACTOR)
    #[argh(option, short = 's')]
    scale_factor: Option<u32>,

    /// root directory dumps are written under (overrides OUTPUT_DIR)
    #[argh(option, short = 'o')]
    output_dir: Option<PathBuf>,

    /// tile url with {x} and {y} placeholders
    #[argh(option)]
    url_template: Option<String>,

    /// tile x coordinate of the leftmost column
    #[argh(option)]
    origin_x: Option<u32>,

    /// tile y coordinate of the top row
    #[argh(option)]
    origin_y: Option<u32>,

    /// download attempts per tile
    #[argh(option)]
    retries: Option<u32>,

    /// hours east of UTC used for dump timestamps
    #[argh(option)]
    utc_offset_hours: Option<i32>,

    #[argh(subcommand)]
    command: Option<Command>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Dump(DumpArgs),
    DownloadTiles(DownloadTilesArgs),
    PrintConfig(PrintConfigArgs),
}

#[derive(FromArgs)]
/// Fetch every tile, merge them and write one dump (default)
#[argh(subcommand, name = "dump")]
struct DumpArgs {}

#[derive(FromArgs)]
/// Save the raw tiles of the grid to a directory without merging
#[argh(subcommand, name = "download-tiles")]
struct DownloadTilesArgs {
    /// directory to save tiles to
    #[argh(option, short = 'd', default = "PathBuf::from(\"tiles\")")]
    dir: PathBuf,
}

#[derive(FromArgs)]
/// Print the effective configuration and tile urls
#[argh(subcommand, name = "print-config")]
struct PrintConfigArgs {}

impl Args {
    fn apply(&self, config: &mut GridConfig) {
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(tile_width) = self.tile_width {
            config.tile_width = tile_width;
        }
        if let Some(tile_height) = self.tile_height {
            config.tile_height = tile_height;
        }
        if let Some(scale_factor) = self.scale_factor {
            config.scale_factor = scale_factor;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(retries) = self.retries {
            config.fetch.retries = retries;
        }
        if let Some(utc_offset_hours) = self.utc_offset_hours {
            config.utc_offset_hours = utc_offset_hours;
        }
        if self.url_template.is_some() || self.origin_x.is_some() || self.origin_y.is_some() {
            let (template, x, y) = match &config.tiles {
                TileSource::Template {
                    url_template,
                    origin_x,
                    origin_y,
                } => (url_template.clone(), *origin_x, *origin_y),
                TileSource::List(_) => (
                    DEFAULT_URL_TEMPLATE.to_string(),
                    DEFAULT_ORIGIN_X,
                    DEFAULT_ORIGIN_Y,
                ),
            };
            config.tiles = TileSource::Template {
                url_template: self.url_template.clone().unwrap_or(template),
                origin_x: self.origin_x.unwrap_or(x),
                origin_y: self.origin_y.unwrap_or(y),
            };
        }
    }
}

#[tokio::main]
pub async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Args = argh::from_env();
    let mut config = GridConfig::load(args.config.as_deref())?;
    config.apply_env(|key| env::var(key).ok())?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    match args.command {
        None | Some(Command::Dump(_)) => {
            dump_merged(&config).await?;
        }
        Some(Command::DownloadTiles(DownloadTilesArgs { dir })) => {
            download_tiles(&config, &dir).await?;
        }
        Some(Command::PrintConfig(_)) => print_config(&config)?,
    }
    Ok(())
}
