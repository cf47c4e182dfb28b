use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use vhd_storage::{
    convert_image_file, create_image_file, parse_size, CreationStamp, DiskType, Image,
    ImageConfig, VhdFooter,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TypeArg {
    Fixed,
    Dynamic,
}

impl From<TypeArg> for DiskType {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::Fixed => DiskType::Fixed,
            TypeArg::Dynamic => DiskType::Dynamic,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ImageArgs {
    /// Logical size, e.g. 10G, 64M, 2048S or plain bytes (required for create)
    #[arg(short = 's', long, global = true, value_name = "SIZE", value_parser = size_arg)]
    size: Option<u64>,

    /// Dynamic block size (default 2M); implies a dynamic disk unless -t is given
    #[arg(short = 'b', long, global = true, value_name = "SIZE", value_parser = size_arg)]
    block_size: Option<u64>,

    /// Grow the size until the CHS geometry describes it exactly
    #[arg(short = 'c', long, global = true, action = clap::ArgAction::SetTrue)]
    size_compat: bool,

    /// Disk type
    #[arg(short = 't', long = "type", global = true, value_enum, ignore_case = true)]
    disk_type: Option<TypeArg>,

    /// Suppress progress output
    #[arg(short = 'q', long, global = true, action = clap::ArgAction::SetTrue)]
    quiet: bool,
}

impl ImageArgs {
    fn to_config(&self) -> anyhow::Result<ImageConfig> {
        Ok(ImageConfig::resolve(
            self.disk_type.map(DiskType::from),
            self.block_size,
            self.size_compat,
        )?)
    }
}

#[derive(Debug, Parser)]
#[command(name = "vhdtool")]
#[command(about = "Create fixed or dynamic VHD images and convert raw images into VHDs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    image: ImageArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new, empty image. Fails if FILE exists.
    Create { file: PathBuf },
    /// Copy a raw image or fixed VHD into a new image.
    Convert { src: PathBuf, dst: PathBuf },
    /// Show what an existing file looks like to this tool.
    Info { file: PathBuf },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Create { .. } => "create",
            Commands::Convert { .. } => "convert",
            Commands::Info { .. } => "info",
        }
    }
}

fn size_arg(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let name = cli.command.name();
    run(cli).with_context(|| format!("command '{name}' failed"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Create { file } => create(file, &cli.image),
        Commands::Convert { src, dst } => convert(src, dst, &cli.image),
        Commands::Info { file } => info(file),
    }
}

fn create(file: &Path, args: &ImageArgs) -> anyhow::Result<()> {
    let Some(size) = args.size.filter(|size| *size != 0) else {
        bail!("a size is required (-s)");
    };
    let config = args.to_config()?;
    let footer = create_image_file(file, size, &config, &CreationStamp::now())
        .with_context(|| format!("create {}", file.display()))?;
    tracing::info!(
        "created '{}' ({} bytes)",
        file.display(),
        footer.current_size
    );
    Ok(())
}

fn convert(src: &Path, dst: &Path, args: &ImageArgs) -> anyhow::Result<()> {
    if args.size.is_some() {
        tracing::warn!("-s is ignored by convert; the size of '{}' is used", src.display());
    }
    let config = args.to_config()?;

    let pb = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("##-"),
        );
        pb
    };

    let status = convert_image_file(src, dst, &config, &CreationStamp::now(), |done, total| {
        pb.set_length(total);
        pb.set_position(done);
    });
    match status {
        Ok(footer) => {
            pb.finish_and_clear();
            tracing::info!(
                "converted '{}' to '{}' ({} bytes)",
                src.display(),
                dst.display(),
                footer.current_size
            );
            Ok(())
        }
        Err(err) => {
            pb.abandon();
            Err(err).with_context(|| format!("convert {} to {}", src.display(), dst.display()))
        }
    }
}

fn info(file: &Path) -> anyhow::Result<()> {
    let image =
        Image::open_file(file, true).with_context(|| format!("open {}", file.display()))?;

    println!("file:      {}", file.display());
    match image.footer() {
        Some(footer) => print_footer(footer),
        None => {
            println!("kind:      raw");
            println!("size:      {} bytes", image.size());
        }
    }
    image.close(true)?;
    Ok(())
}

fn print_footer(footer: &VhdFooter) {
    let kind = match footer.kind() {
        Some(kind) => kind.to_string(),
        None => format!("unknown ({})", footer.disk_type),
    };
    let g = footer.geometry;
    println!("kind:      {kind} vhd");
    println!("size:      {} bytes", footer.current_size);
    println!("original:  {} bytes", footer.original_size);
    println!(
        "chs:       {}/{}/{}",
        g.cylinders, g.heads, g.sectors_per_track
    );
    println!("id:        {}", footer.disk_id.hyphenated());
    println!(
        "creator:   {} v{} ({})",
        String::from_utf8_lossy(&footer.creator_app),
        footer.creator_version,
        String::from_utf8_lossy(&footer.creator_os).trim_end()
    );
    println!("timestamp: {}", footer.timestamp);
    println!(
        "checksum:  {:#010x} ({})",
        footer.checksum,
        if footer.checksum_valid() { "ok" } else { "bad" }
    );
}
