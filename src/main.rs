//! Boot an in-memory VFS and drive it with a command script.
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kvfs::fs::ramfs::RamFs;
use kvfs::fs::{MountFlags, Vfs};
use tracing::{debug, error};

mod app_config;
mod script;
mod trc;

use crate::script::Shell;
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "A kernel-style virtual filesystem core, driven from a script.")]
struct Args {
    #[arg(short, long, value_parser, help = "Optional path to a kvfs config TOML.")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute commands, one per line, from a script or standard input.
    Run {
        /// Script to execute. Reads standard input if omitted.
        script: Option<PathBuf>,

        /// Keep going after a failing command.
        #[arg(short, long)]
        keep_going: bool,
    },
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    if let Err(e) = Trc::default().init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }

    let config = app_config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    debug!(config = ?config, "Booting VFS.");

    let vfs = match Vfs::new(config) {
        Ok(vfs) => vfs,
        Err(e) => {
            error!("Failed to boot the VFS: {e}");
            std::process::exit(1);
        }
    };
    let booted = vfs
        .register_filesystem(Arc::new(RamFs::new()))
        .and_then(|()| vfs.mount_root(RamFs::NAME, MountFlags::empty()));
    if let Err(e) = booted {
        error!("Failed to mount the root filesystem: {e}");
        std::process::exit(1);
    }

    let Command::Run { script, keep_going } = args.command.unwrap_or(Command::Run {
        script: None,
        keep_going: false,
    });
    let input: Box<dyn BufRead> = match script {
        Some(path) => match std::fs::File::open(&path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                error!(path = ?path, "Failed to open script: {e}");
                std::process::exit(1);
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut shell = Shell::new(&vfs);
    let mut stdout = io::stdout().lock();
    let mut failed = false;
    for (number, line) in input.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read script: {e}");
                failed = true;
                break;
            }
        };
        if let Err(e) = shell.exec(&line, &mut stdout) {
            error!(line = number + 1, "{line}: {e}");
            failed = true;
            if !keep_going {
                break;
            }
        }
    }
    if let Err(e) = stdout.flush() {
        error!("Failed to flush output: {e}");
    }
    shell.finish();

    if failed {
        std::process::exit(1);
    }
}
