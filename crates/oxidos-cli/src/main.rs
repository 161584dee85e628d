use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use oxidos_boot::BootOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Disk image to operate on.
    #[arg(long, default_value = "DISK")]
    disk: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay down an empty file system on the image.
    Format,
    /// Copy a host file into the file system.
    Copy {
        /// Host file to read.
        from: PathBuf,
        /// Destination path inside the file system.
        to: String,
    },
    /// List the names in a directory.
    List {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file's contents to stdout.
    Print { path: String },
    /// Remove a file or an empty directory.
    Remove { path: String },
    /// Create an empty directory.
    Mkdir { path: String },
    /// Dump the free-sector count and the whole tree.
    Dump,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let format = matches!(&cli.command, Commands::Format);
    let system = oxidos_boot::boot(BootOptions::new(&cli.disk).format(format))?;
    let fs = &system.kernel.fs;

    match cli.command {
        Commands::Format => {
            println!("formatted {:?}", cli.disk);
        }
        Commands::Copy { from, to } => {
            let data = std::fs::read(&from).with_context(|| format!("reading {:?}", from))?;
            fs.create(&to, 0, false)
                .with_context(|| format!("creating {}", to))?;
            let mut file = fs.open(&to).with_context(|| format!("opening {}", to))?;
            file.write(&data)
                .with_context(|| format!("writing {}", to))?;
            println!("copied {} bytes to {}", data.len(), to);
        }
        Commands::List { path } => {
            for name in fs.list(&path).with_context(|| format!("listing {}", path))? {
                println!("{name}");
            }
        }
        Commands::Print { path } => {
            let mut file = fs.open(&path).with_context(|| format!("opening {}", path))?;
            let mut buf = [0u8; 512];
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
        }
        Commands::Remove { path } => {
            fs.remove(&path).with_context(|| format!("removing {}", path))?;
            println!("removed {}", path);
        }
        Commands::Mkdir { path } => {
            fs.create(&path, 0, true)
                .with_context(|| format!("creating directory {}", path))?;
            println!("created {}", path);
        }
        Commands::Dump => {
            print!("{}", fs.print()?);
        }
    }
    Ok(())
}
