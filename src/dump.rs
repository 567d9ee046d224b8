use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use std::fs::create_dir_all;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::{info, instrument};

/// Current time in the fixed UTC offset dumps are named by.
pub fn now(utc_offset_hours: i32) -> Result<DateTime<FixedOffset>> {
    let offset = utc_offset(utc_offset_hours)?;
    Ok(Utc::now().with_timezone(&offset))
}

pub fn utc_offset(utc_offset_hours: i32) -> Result<FixedOffset> {
    utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow!("invalid UTC offset of {} hours", utc_offset_hours))
}

/// `root/YYYYMMDD/merged_tiles_YYYYMMDD_HHMMSS.png`
pub fn dump_path<Tz>(root: &Path, timestamp: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    root.join(timestamp.format("%Y%m%d").to_string()).join(format!(
        "merged_tiles_{}.png",
        timestamp.format("%Y%m%d_%H%M%S")
    ))
}

/// Encodes `canvas` as PNG and stores it under its dated path.
///
/// The image is written to a temporary file next to the destination and only renamed into place
/// once fully encoded, so a failed run never leaves a file under the final name. A process killed
/// mid-encode can leave a hidden `.merged_tiles_*.partial` file behind. An existing dump with the
/// same name is never replaced.
#[instrument(skip(canvas, timestamp), fields(width = canvas.width(), height = canvas.height()))]
pub fn write_dump(
    canvas: &RgbaImage,
    root: &Path,
    timestamp: &DateTime<FixedOffset>,
) -> Result<PathBuf> {
    let path = dump_path(root, timestamp);
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("dump path {} has no parent directory", path.display()))?;
    create_dir_all(dir)
        .with_context(|| format!("write failed: cannot create directory {}", dir.display()))?;

    let mut temp_file = Builder::new()
        .prefix(".merged_tiles_")
        .suffix(".partial")
        .tempfile_in(dir)
        .with_context(|| {
            format!(
                "write failed: cannot create temporary file in {}",
                dir.display()
            )
        })?;
    {
        let mut writer = BufWriter::new(temp_file.as_file_mut());
        let encoder =
            PngEncoder::new_with_quality(&mut writer, CompressionType::Best, FilterType::Adaptive);
        encoder
            .write_image(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                ExtendedColorType::Rgba8,
            )
            .with_context(|| format!("write failed: cannot encode {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("write failed: cannot flush {}", path.display()))?;
    }
    temp_file
        .as_file()
        .sync_all()
        .with_context(|| format!("write failed: cannot sync {}", path.display()))?;
    temp_file
        .persist_noclobber(&path)
        .map_err(|err| err.error)
        .with_context(|| format!("write failed: cannot persist {}", path.display()))?;

    info!(path = %path.display(), "saved dump");
    Ok(path)
}
