use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sdrescue_core::{dump_image, DumpReport, ImageDevice, SectorDevice, ServerConfig};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "sdrescue", version, about = "Serve a failing storage card over HTTP for recovery")]
struct Cli {
	/// Enable debug logging
	#[arg(long, short, global = true)]
	verbose: bool,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Serve listings, files and the raw image over HTTP
	Serve {
		/// Block device node or image file
		#[arg(long)]
		device: Option<PathBuf>,
		/// Directory where the card's filesystem is mounted
		#[arg(long)]
		root: Option<PathBuf>,
		/// Listen address
		#[arg(long)]
		bind: Option<SocketAddr>,
		#[arg(long)]
		sector_size: Option<usize>,
		/// JSON configuration file; flags override its values
		#[arg(long)]
		config: Option<PathBuf>,
	},
	/// Show device geometry
	Info {
		#[arg(long)]
		device: PathBuf,
		#[arg(long, default_value_t = sdrescue_core::config::DEFAULT_SECTOR_SIZE)]
		sector_size: usize,
	},
	/// Write a raw image of the device to a local file
	Dump {
		#[arg(long)]
		device: PathBuf,
		/// Output image path; the report is written next to it
		#[arg(long)]
		out: PathBuf,
		#[arg(long, default_value_t = sdrescue_core::config::DEFAULT_SECTOR_SIZE)]
		sector_size: usize,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
		.init();

	match cli.command {
		Commands::Serve { device, root, bind, sector_size, config } => {
			let mut server_config = match config {
				Some(path) => ServerConfig::from_file(&path)?,
				None => ServerConfig::default(),
			};
			if let Some(device) = device {
				server_config.device = device;
			}
			if let Some(root) = root {
				server_config.root = root;
			}
			if let Some(bind) = bind {
				server_config.bind = bind;
			}
			if let Some(sector_size) = sector_size {
				server_config.sector_size = sector_size;
			}
			server_config.validate()?;

			let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
			runtime.block_on(sdrescue_core::serve(&server_config))?;
		}
		Commands::Info { device, sector_size } => {
			let device = ImageDevice::open(&device, sector_size)
				.with_context(|| format!("Failed to open device {}", device.display()))?;

			println!("Device: {}", device.describe());
			println!("Sectors: {}", device.sector_count());
			println!("Sector size: {} bytes", device.sector_size());
			println!("Total: {} bytes ({} MB)", device.total_bytes(), device.total_bytes() / (1024 * 1024));
		}
		Commands::Dump { device, out, sector_size } => {
			let device = ImageDevice::open(&device, sector_size)
				.with_context(|| format!("Failed to open device {}", device.display()))?;

			let pb = ProgressBar::new(device.sector_count());
			pb.set_style(
				ProgressStyle::default_bar()
					.template("[{bar:40.cyan/blue}] {pos}/{len} sectors {msg}")?
					.progress_chars("=>-"),
			);

			let report = dump_image(Arc::new(device), &out, |progress| {
				pb.set_position(progress.sector + 1);
				if progress.damaged > 0 {
					pb.set_message(format!("({} damaged)", progress.damaged));
				}
			})?;
			pb.finish_and_clear();

			println!("Image: {}", out.display());
			println!("Report: {}", DumpReport::path_for(&out).display());
			println!("Bytes: {}", report.total_bytes);
			println!("Damaged sectors: {}", report.damaged_sectors.len());
			println!("SHA-256: {}", report.sha256);
		}
	}
	Ok(())
}
