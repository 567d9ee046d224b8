use anyhow::{bail, Context, Result};
use image::{imageops, ImageFormat, RgbaImage};
use tracing::{debug, info, instrument};

use crate::config::GridConfig;
use crate::fetcher::FetchedTile;

/// Enlarges `source` by replicating every pixel into a `scale`×`scale` block.
pub fn enlarge(source: &RgbaImage, scale: u32) -> RgbaImage {
    if scale <= 1 {
        return source.clone();
    }
    RgbaImage::from_fn(source.width() * scale, source.height() * scale, |x, y| {
        *source.get_pixel(x / scale, y / scale)
    })
}

pub fn decode_tile(tile: &FetchedTile, width: u32, height: u32) -> Result<RgbaImage> {
    let decoded = image::load_from_memory_with_format(&tile.bytes, ImageFormat::Png)
        .with_context(|| {
            format!(
                "decode failed for tile ({}, {}) from {}",
                tile.column, tile.row, tile.url
            )
        })?
        .into_rgba8();
    if decoded.dimensions() != (width, height) {
        bail!(
            "decode failed for tile ({}, {}) from {}: expected {}x{} pixels, got {}x{}",
            tile.column,
            tile.row,
            tile.url,
            width,
            height,
            decoded.width(),
            decoded.height()
        );
    }
    Ok(decoded)
}

/// Places every tile, enlarged, at its grid offset on a transparent canvas.
///
/// Every grid cell must be covered exactly once. Any tile that fails to decode or has the wrong
/// size aborts the whole composition.
#[instrument(skip(config, tiles), fields(num_tiles = tiles.len()))]
pub fn compose(config: &GridConfig, tiles: &[FetchedTile]) -> Result<RgbaImage> {
    if tiles.len() != config.total_tiles() {
        bail!(
            "expected {} tiles for a {}x{} grid, got {}",
            config.total_tiles(),
            config.columns,
            config.rows,
            tiles.len()
        );
    }
    let mut seen = vec![false; config.total_tiles()];
    for tile in tiles {
        if tile.column >= config.columns || tile.row >= config.rows {
            bail!(
                "tile ({}, {}) lies outside the {}x{} grid",
                tile.column,
                tile.row,
                config.columns,
                config.rows
            );
        }
        let index = (tile.row * config.columns + tile.column) as usize;
        if seen[index] {
            bail!("tile ({}, {}) appears more than once", tile.column, tile.row);
        }
        seen[index] = true;
    }

    let (width, height) = config.canvas_dimensions();
    let (scaled_width, scaled_height) = config.scaled_tile_dimensions();
    info!(
        width,
        height,
        scale_factor = config.scale_factor,
        "composing canvas"
    );
    let mut canvas = RgbaImage::new(width, height);
    for tile in tiles {
        let decoded = decode_tile(tile, config.tile_width, config.tile_height)?;
        let enlarged = enlarge(&decoded, config.scale_factor);
        let x = tile.column * scaled_width;
        let y = tile.row * scaled_height;
        imageops::replace(&mut canvas, &enlarged, x as i64, y as i64);
        debug!(column = tile.column, row = tile.row, x, y, "placed tile");
    }
    Ok(canvas)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, Rgba};
    use std::io::Cursor;

    pub(crate) fn png_bytes(image: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Tile whose pixels encode their own position and the tile's grid cell.
    pub(crate) fn patterned_tile(column: u32, row: u32, size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            Rgba([x as u8, y as u8, (column * 16 + row) as u8, 255])
        })
    }

    fn fetched(column: u32, row: u32, image: &RgbaImage) -> FetchedTile {
        FetchedTile {
            column,
            row,
            url: format!("http://tiles.test/{}/{}.png", column, row),
            bytes: png_bytes(image),
        }
    }

    fn small_grid(columns: u32, rows: u32, tile_size: u32, scale_factor: u32) -> GridConfig {
        GridConfig {
            columns,
            rows,
            tile_width: tile_size,
            tile_height: tile_size,
            scale_factor,
            ..GridConfig::default()
        }
    }

    #[test]
    fn enlarge_replicates_pixels_into_blocks() {
        let source = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 128])
            }
        });

        let enlarged = enlarge(&source, 3);

        assert_eq!(enlarged.dimensions(), (6, 3));
        for y in 0..3 {
            for x in 0..3 {
                assert_eq!(*enlarged.get_pixel(x, y), Rgba([255, 0, 0, 255]));
                assert_eq!(*enlarged.get_pixel(x + 3, y), Rgba([0, 0, 255, 128]));
            }
        }
    }

    #[test]
    fn enlarge_by_one_is_identity() {
        let source = patterned_tile(1, 1, 4);
        assert_eq!(enlarge(&source, 1), source);
    }

    #[test]
    fn compose_places_scaled_tiles_without_blending() {
        let config = small_grid(3, 2, 4, 2);
        let images: Vec<(u32, u32, RgbaImage)> = config
            .tiles()
            .iter()
            .map(|tile| (tile.column, tile.row, patterned_tile(tile.column, tile.row, 4)))
            .collect();
        let tiles: Vec<FetchedTile> = images
            .iter()
            .map(|(column, row, image)| fetched(*column, *row, image))
            .collect();

        let canvas = compose(&config, &tiles).unwrap();

        assert_eq!(canvas.dimensions(), (24, 16));
        for (column, row, image) in &images {
            for y in 0..8 {
                for x in 0..8 {
                    assert_eq!(
                        canvas.get_pixel(column * 8 + x, row * 8 + y),
                        image.get_pixel(x / 2, y / 2),
                        "tile ({}, {}) pixel ({}, {})",
                        column,
                        row,
                        x,
                        y
                    );
                }
            }
        }
    }

    #[test]
    fn compose_accepts_tiles_in_any_order() {
        let config = small_grid(2, 1, 2, 1);
        let left = patterned_tile(0, 0, 2);
        let right = patterned_tile(1, 0, 2);
        let tiles = vec![fetched(1, 0, &right), fetched(0, 0, &left)];

        let canvas = compose(&config, &tiles).unwrap();

        assert_eq!(canvas.get_pixel(0, 0), left.get_pixel(0, 0));
        assert_eq!(canvas.get_pixel(3, 1), right.get_pixel(1, 1));
    }

    #[test]
    fn wrong_tile_size_aborts() {
        let config = small_grid(2, 1, 4, 1);
        let tiles = vec![
            fetched(0, 0, &patterned_tile(0, 0, 4)),
            fetched(1, 0, &patterned_tile(1, 0, 3)),
        ];

        let err = compose(&config, &tiles).unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("tile (1, 0)"), "{}", message);
        assert!(message.contains("expected 4x4 pixels, got 3x3"), "{}", message);
    }

    #[test]
    fn corrupt_bytes_abort() {
        let config = small_grid(1, 1, 4, 1);
        let tiles = vec![FetchedTile {
            column: 0,
            row: 0,
            url: "http://tiles.test/0/0.png".to_string(),
            bytes: b"<html>not a png</html>".to_vec(),
        }];

        let err = compose(&config, &tiles).unwrap_err();

        assert!(format!("{:#}", err).contains("decode failed for tile (0, 0)"));
    }

    #[test]
    fn incomplete_grid_aborts() {
        let config = small_grid(2, 2, 2, 1);
        let tiles = vec![
            fetched(0, 0, &patterned_tile(0, 0, 2)),
            fetched(1, 0, &patterned_tile(1, 0, 2)),
            fetched(0, 1, &patterned_tile(0, 1, 2)),
        ];
        assert!(compose(&config, &tiles).is_err());

        let duplicated = vec![
            fetched(0, 0, &patterned_tile(0, 0, 2)),
            fetched(1, 0, &patterned_tile(1, 0, 2)),
            fetched(0, 1, &patterned_tile(0, 1, 2)),
            fetched(0, 1, &patterned_tile(0, 1, 2)),
        ];
        let err = compose(&config, &duplicated).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
