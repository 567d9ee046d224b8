pub mod download_tiles;
pub mod dump_merged;
pub mod print_config;

pub use download_tiles::download_tiles;
pub use dump_merged::dump_merged;
pub use print_config::print_config;
