use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use mfs::mfs::Mfs;
use mfs::server::Server;
use mfs::storage::FileBackedStorage;
use mfs::transport::UdpTransport;

#[derive(Parser)]
struct Args {
    /// UDP port to listen on
    port: u16,
    /// MFS image file
    image: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = File::options()
        .read(true)
        .write(true)
        .open(&args.image)
        .with_context(|| format!("unable to open {} in read-write mode", args.image.display()))?;

    let mfs = Mfs::load(FileBackedStorage::new(image))?;
    let transport = UdpTransport::bind(("0.0.0.0", args.port))?;

    Server::new(mfs, transport).run()
}
