use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;

use tosfs::fs::FilesystemCore;
use tosfs::session::Session;
use tosfs::volume::Volume;

/// Mount a TOSFS image as a FUSE filesystem.
#[derive(Parser, Debug)]
#[command(name = "tosfs", version, about)]
struct Args {
    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Path to the TOSFS disk image.
    image: PathBuf,

    /// Extra FUSE mount options (e.g. `-o ro`, `-o allow_other`), may be
    /// repeated.
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,

    /// Increase log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn mount_option(raw: &str) -> MountOption {
    match raw {
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "dirsync" => MountOption::DirSync,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        "auto_unmount" => MountOption::AutoUnmount,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "default_permissions" => MountOption::DefaultPermissions,
        other => MountOption::CUSTOM(other.to_string()),
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let volume = Volume::open(&args.image)
        .with_context(|| format!("opening image {}", args.image.display()))?;
    let core = FilesystemCore::new(volume);
    let session = Session::new(core);

    let mut options = vec![MountOption::FSName("tosfs".to_string())];
    options.extend(args.options.iter().map(|o| mount_option(o)));

    info!("mounting {} at {}", args.image.display(), args.mountpoint.display());
    fuser::mount2(session, &args.mountpoint, &options)
        .with_context(|| format!("mounting at {}", args.mountpoint.display()))?;
    Ok(())
}
