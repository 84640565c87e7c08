//! CLI command definitions and argument parsing

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use ota_engine::{
    mailbox, EngineConfig, EngineContext, FileFlash, FirmwareEntry, PackageBuilder, UiReceiver,
    UiSender, UpdateOrchestrator, VersionEntry,
};

use crate::console::{Console, ConsoleOptions, LogRestart};
use crate::route::RoutingTransport;

/// OTA device runner - drives the update engine against a flash image
#[derive(Parser, Debug)]
#[command(name = "ota-device")]
#[command(version, about = "OTA device runner - drives the update engine against a flash image")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(long, global = true, env = "OTA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Flash image backing the device
    #[arg(long, global = true, default_value = "flash.img")]
    pub flash: PathBuf,

    /// First address mapped by the flash image (defaults to the loader start)
    #[arg(long, global = true, value_parser = parse_u32)]
    pub flash_base: Option<u32>,

    /// Size of the flash image in bytes (defaults to the loader size)
    #[arg(long, global = true, value_parser = parse_u32)]
    pub flash_size: Option<u32>,

    /// Log filter, e.g. `info` or `ota_engine=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Debug mode (package and flash tracing)
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the server for newer versions and store them in the catalog
    Query,
    /// Show the versions stored in the catalog
    List,
    /// Show the firmware manifest of the last package
    Manifest,
    /// Install a catalog version
    Update(UpdateArgs),
    /// Build a package from firmware images
    Pack(PackArgs),
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Catalog slot to install
    pub index: usize,

    /// Confirm without prompting
    #[arg(short, long)]
    pub yes: bool,

    /// Restart the device after a successful install
    #[arg(long)]
    pub restart: bool,
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Output package path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Firmware image as PATH:DEST_ADDR:REGION_SIZE (up to three)
    #[arg(short, long = "file", required = true, value_parser = parse_file_spec)]
    pub files: Vec<FileSpec>,
}

/// One image to pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub dest_addr: u32,
    pub region_size: u32,
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

/// Parse `PATH:DEST_ADDR:REGION_SIZE`; the path may itself contain colons.
pub fn parse_file_spec(s: &str) -> Result<FileSpec, String> {
    let mut parts = s.rsplitn(3, ':');
    let (Some(region), Some(dest), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected PATH:DEST_ADDR:REGION_SIZE, got '{s}'"));
    };
    if path.is_empty() {
        return Err("empty file path".to_string());
    }
    Ok(FileSpec {
        path: PathBuf::from(path),
        dest_addr: parse_u32(dest)?,
        region_size: parse_u32(region)?,
    })
}

impl Cli {
    /// Load the configuration named on the command line, or the defaults.
    pub fn load_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load_from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => EngineConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Pack(args) => pack(args),
            Commands::Query => {
                let mut engine = self.engine()?;
                let count = engine.orchestrator.query_versions()?;
                println!("{count} newer version(s) found");
                print_versions(&engine.orchestrator)
            }
            Commands::List => {
                let engine = self.engine()?;
                let slots = engine.orchestrator.context().catalog().entries()?;
                for (index, entry) in slots.iter().enumerate() {
                    if entry.is_absent() {
                        println!("[{index}]  (empty)");
                    } else {
                        print_version(index, entry);
                    }
                }
                Ok(())
            }
            Commands::Manifest => {
                let engine = self.engine()?;
                let manifest = engine.orchestrator.context().manifest_store().load()?;
                if manifest.is_empty() {
                    println!("no firmware recorded");
                }
                for entry in &manifest {
                    print_entry(entry);
                }
                Ok(())
            }
            Commands::Update(args) => {
                let Engine {
                    mut orchestrator,
                    receiver,
                    events,
                    options,
                } = self.engine()?;
                orchestrator.select_version(args.index)?;
                let mut console = Console::new(
                    receiver,
                    events,
                    ConsoleOptions {
                        auto_confirm: args.yes,
                        restart_on_success: args.restart,
                        ..options
                    },
                );
                console.run(&mut orchestrator)
            }
        }
    }

    /// Open the flash image and wire the engine around it.
    fn engine(&self) -> anyhow::Result<Engine> {
        let config = self.load_config()?;
        let (events, receiver) = mailbox(config.ui.mailbox_capacity);
        let options = ConsoleOptions {
            poll_interval_ms: config.ui.poll_interval_ms,
            ..ConsoleOptions::default()
        };

        let base = self.flash_base.unwrap_or(config.partition.loader_start);
        let size = self.flash_size.unwrap_or(config.partition.loader_size);
        let flash = FileFlash::open_or_create(&self.flash, base, size as usize)
            .with_context(|| format!("failed to open flash image {}", self.flash.display()))?;
        let transport = RoutingTransport::new(&config.network)?;

        let ctx = EngineContext::new(config, Arc::new(flash), Arc::new(transport), events.clone())?
            .with_device(Arc::new(LogRestart));

        Ok(Engine {
            orchestrator: UpdateOrchestrator::new(ctx),
            receiver,
            events,
            options,
        })
    }
}

/// Engine wired for one command.
struct Engine {
    orchestrator: UpdateOrchestrator,
    receiver: UiReceiver,
    events: UiSender,
    options: ConsoleOptions,
}

fn print_versions(orchestrator: &UpdateOrchestrator) -> anyhow::Result<()> {
    let versions = orchestrator.versions()?;
    if versions.is_empty() {
        println!("no versions available");
    }
    for (index, entry) in &versions {
        print_version(*index, entry);
    }
    Ok(())
}

fn print_version(index: usize, entry: &VersionEntry) {
    let flag = if entry.needs_update { "*" } else { " " };
    println!("[{index}]{flag} {:<16} {}", entry.name.as_str(), entry.source_locator.as_str());
}

fn print_entry(entry: &FirmwareEntry) {
    println!(
        "{:<24} dest={:#010x} len={:<8} region={:#x} crc={:#010x}",
        entry.name.as_str(),
        entry.dest_addr,
        entry.compressed_len,
        entry.region_size,
        entry.data_crc
    );
}

fn pack(args: &PackArgs) -> anyhow::Result<()> {
    let mut builder = PackageBuilder::new();
    for spec in &args.files {
        let payload = std::fs::read(&spec.path)
            .with_context(|| format!("failed to read {}", spec.path.display()))?;
        let name = file_name(&spec.path)?;
        info!(name, len = payload.len(), dest = format_args!("{:#010x}", spec.dest_addr), "adding image");
        builder = builder.add_file(name, spec.dest_addr, spec.region_size, payload)?;
    }
    let package = builder.build()?;
    std::fs::write(&args.output, &package)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("wrote {} ({} bytes)", args.output.display(), package.len());
    Ok(())
}

fn file_name(path: &Path) -> anyhow::Result<&str> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name),
        None => bail!("{} has no usable file name", path.display()),
    }
}
