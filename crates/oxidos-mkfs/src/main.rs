use std::path::PathBuf;

use clap::Parser;
use oxidos_boot::BootOptions;
use oxidos_layout::{NUM_SECTORS, SECTOR_SIZE};

/// Create a disk image holding an empty file system.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the disk image to create.
    image: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let system = oxidos_boot::boot(BootOptions::new(&cli.image).format(true))?;
    let free = system.kernel.fs.free_sectors()?;
    println!(
        "formatted {:?}: {} sectors of {} bytes, {} free",
        cli.image, NUM_SECTORS, SECTOR_SIZE, free
    );
    Ok(())
}
