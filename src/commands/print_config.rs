use anyhow::Result;

use crate::config::GridConfig;

pub fn print_config(config: &GridConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    for tile in config.tiles() {
        println!("# ({}, {}) {}", tile.column, tile.row, tile.url);
    }
    Ok(())
}
