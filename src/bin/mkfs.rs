use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use mfs::{
    disk_format::block::BLOCK_SIZE,
    mkfs::{format, Geometry},
    storage::FileBackedStorage,
};

#[derive(Parser)]
struct Args {
    /// image file to create or overwrite
    image: PathBuf,
    /// number of inodes
    #[arg(long, default_value_t = Geometry::default().num_inodes)]
    inodes: usize,
    /// number of data blocks
    #[arg(long, default_value_t = Geometry::default().num_data)]
    blocks: usize,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let geometry = Geometry {
        num_inodes: args.inodes,
        num_data: args.blocks,
    };

    let image = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.image)
        .with_context(|| format!("unable to create {}", args.image.display()))?;
    image.set_len((geometry.num_blocks() * BLOCK_SIZE) as u64)?;

    format(&FileBackedStorage::new(image), geometry)?;

    Ok(())
}
