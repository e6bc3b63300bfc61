use anyhow::{Context, Result};
use clap::Parser;
use std::path;

use rlbank::bank::{promote, RlBank};
use rlbank::config::BankConfig;
use rlbank::platform::{bank_name, SocInfo};
use rlbank::pprint::pprint_namespace;
use rlbank::store::{self, paths};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Color mode
    #[arg(long, value_enum, default_value_t = ColorMode::Auto)]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, PartialEq, clap::ValueEnum)]
enum ColorMode {
    Never,
    Auto,
    Always,
}

#[derive(clap::Args)]
struct DeviceArgs {
    #[arg(long)]
    soc_version: String,
    #[arg(long, default_value = "AiCore")]
    aicore_type: String,
    #[arg(long)]
    core_num: u32,
}

#[derive(clap::Subcommand)]
enum Command {
    #[command(about = "Print the entries of a single bank file")]
    Show { file: path::PathBuf },
    #[command(about = "Print a device's custom and built-in banks")]
    List {
        #[command(flatten)]
        device: DeviceArgs,
    },
    #[command(about = "Merge a device's custom shards into one file")]
    Compact {
        #[command(flatten)]
        device: DeviceArgs,
    },
    #[command(about = "Promote entries of one bank file into another")]
    Promote {
        source: path::PathBuf,
        target: path::PathBuf,
    },
}

impl ColorMode {
    fn enabled(self) -> bool {
        match self {
            ColorMode::Never => false,
            ColorMode::Always => true,
            ColorMode::Auto => atty::is(atty::Stream::Stdout),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let colored = args.color.enabled();
    match &args.command {
        Command::Show { file } => {
            let ns = store::read_bank_file(file)
                .with_context(|| format!("reading {}", file.display()))?
                .with_context(|| format!("{} does not exist", file.display()))?;
            pprint_namespace(&ns, colored);
        }
        Command::List { device } => {
            let soc = SocInfo::new(&device.soc_version, &device.aicore_type, device.core_num);
            let bank = RlBank::from_env(soc);
            let namespaces = bank.namespaces().context("loading bank")?;
            println!("custom ({} entries)", namespaces.custom.len());
            pprint_namespace(&namespaces.custom, colored);
            println!();
            println!("built-in ({} entries)", namespaces.builtin.len());
            pprint_namespace(&namespaces.builtin, colored);
        }
        Command::Compact { device } => {
            let config = BankConfig::from_env();
            let dir = paths::resolve_custom_root(&config).namespace_dir(&device.soc_version);
            let name = bank_name(&device.soc_version, &device.aicore_type, device.core_num);
            let before = store::shard_files(&dir, &name)?.len();
            let merged = store::load_custom(&dir, &name)
                .with_context(|| format!("compacting {}", dir.display()))?;
            println!(
                "{}: {} shard(s) -> {} shard(s), {} entries",
                dir.display(),
                before,
                store::shard_files(&dir, &name)?.len(),
                merged.len()
            );
        }
        Command::Promote { source, target } => {
            let candidates = store::read_bank_file(source)
                .with_context(|| format!("reading {}", source.display()))?
                .unwrap_or_default();
            let summary = promote(&candidates, target)
                .with_context(|| format!("promoting into {}", target.display()))?;
            println!(
                "inserted={}, replaced={}, kept={}",
                summary.inserted, summary.replaced, summary.kept
            );
        }
    }
    Ok(())
}
