use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tes_bsa_core::bsa::BsaArchive;
use tes_bsa_core::compression::CompressionStrategy;

mod pack;
mod unpack;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build an archive from a directory tree
    Pack(PackCommand),
    /// Extract an archive to a directory
    Unpack(UnpackCommand),
    /// List archive entries
    List(ListCommand),
    /// Show the archive header summary
    Info(InfoCommand),
}

#[derive(Debug, Args)]
struct PackCommand {
    /// Input directory
    input: PathBuf,
    /// Output archive path (defaults to `<input>.bsa` next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Deflate effort for compressed entries
    #[arg(long, value_enum, default_value_t = Level::Balanced)]
    level: Level,
    /// Store every file uncompressed
    #[arg(long)]
    no_compress: bool,
    /// Extensions that are never compressed (repeatable)
    #[arg(long = "uncompressed-ext", value_name = "EXT")]
    uncompressed_ext: Vec<String>,
    /// Omit folder and file name tables
    #[arg(long)]
    no_names: bool,
    /// Prefix each data block with its full path
    #[arg(long)]
    embed_names: bool,
    /// Overwrite an existing output file
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    Fast,
    Balanced,
    Best,
}

impl Level {
    fn strategy(self) -> CompressionStrategy {
        match self {
            Self::Fast => CompressionStrategy::FavorSpeed,
            Self::Balanced => CompressionStrategy::Balanced,
            Self::Best => CompressionStrategy::FavorSize,
        }
    }
}

#[derive(Debug, Args)]
struct UnpackCommand {
    /// Input archive path
    input: PathBuf,
    /// Output directory (defaults to the archive name next to it)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Only extract entries whose full path matches this regex
    #[arg(long)]
    filter: Option<String>,
    /// Worker thread count (defaults to one per core)
    #[arg(long)]
    threads: Option<usize>,
    /// Keep going when an entry fails and report at the end
    #[arg(long)]
    skip_errors: bool,
    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct ListCommand {
    /// Input archive path
    input: PathBuf,
    /// Emit JSON instead of the plain table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct InfoCommand {
    /// Input archive path
    input: PathBuf,
    /// Emit JSON instead of the plain summary
    #[arg(long)]
    json: bool,
}

fn open_archive(path: &PathBuf) -> anyhow::Result<BsaArchive> {
    BsaArchive::open(path).context(format!("Failed to open archive `{}`", path.display()))
}

fn list(cmd: &ListCommand) -> anyhow::Result<()> {
    let archive = open_archive(&cmd.input)?;
    let infos = archive.file_infos();
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    for info in &infos {
        println!(
            "{} {:>12} {:>12}  {}\\{}",
            if info.compressed { "z" } else { "-" },
            display_size(info.stored_size),
            display_size(info.extracted_size),
            info.folder,
            info.name
        );
    }
    println!("{} files", infos.len());
    Ok(())
}

fn display_size(size: Option<u64>) -> String {
    size.map_or_else(|| "?".to_string(), |s| s.to_string())
}

fn info(cmd: &InfoCommand) -> anyhow::Result<()> {
    let archive = open_archive(&cmd.input)?;
    let info = archive.info();
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("version:          0x{:x}", info.version);
    println!("archive flags:    {:#010x}", info.archive_flags);
    println!("  named dirs:     {}", info.named_directories);
    println!("  named files:    {}", info.named_files);
    println!("  compressed:     {}", info.default_compressed);
    println!("  embedded names: {}", info.bstring_prefixed);
    println!("folders:          {}", info.folder_count);
    println!("files:            {}", info.file_count);
    println!("file type flags:  {:#06x}", info.file_flags);
    if let Some(size) = info.source_size {
        println!("source size:      {size} bytes");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Pack(cmd) => pack::pack(cmd),
        Command::Unpack(cmd) => unpack::unpack(cmd),
        Command::List(cmd) => list(cmd),
        Command::Info(cmd) => info(cmd),
    }
}
