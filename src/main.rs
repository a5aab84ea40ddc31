//! gcmemcard - GameCube memory card reader/writer
//!
//! Dumps a memory card hanging off a host SPI controller to a raw image
//! and writes images back. Writes are driven by a baseline image (what the
//! card holds now) and only the blocks that differ from it are erased and
//! reprogrammed.

mod bus;
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::CardOptions;
use gcmemcard_core::protocol::ProtocolConfig;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Exit status after Ctrl-C, as shells report it
const EXIT_INTERRUPTED: u8 = 130;

static CANCEL: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(flag) = CANCEL.get() {
        flag.store(true, Ordering::Relaxed);
    }
    // A second Ctrl-C kills the process
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

/// Stop between blocks on Ctrl-C instead of dying in the middle of one
fn install_sigint_handler() -> Arc<AtomicBool> {
    let flag = CANCEL.get_or_init(|| Arc::new(AtomicBool::new(false))).clone();
    let handler = on_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
    flag
}

fn card_options(cli: &Cli) -> Result<CardOptions, Box<dyn std::error::Error>> {
    let bus = cli.bus.clone().ok_or_else(|| {
        format!(
            "No bus given. Use -b <bus> [available: {}]",
            bus::bus_names_short()
        )
    })?;
    let timeout = Duration::from_millis(cli.timeout_ms);
    let config = ProtocolConfig::default()
        .with_read_attempts(cli.retries)
        .with_write_attempts(cli.retries)
        .with_ready_timeout(timeout)
        .with_erase_timeout(timeout);

    Ok(CardOptions {
        bus,
        config,
        cancel: install_sigint_handler(),
    })
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Read { output } => commands::run_read(&card_options(cli)?, output),
        Commands::Write {
            baseline,
            target,
            no_verify,
        } => commands::run_write(&card_options(cli)?, baseline, target, !*no_verify).map(|_| ()),
        Commands::Info => commands::run_info(&card_options(cli)?),
        Commands::ListBuses => {
            commands::list_buses();
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logger, -v overrides RUST_LOG
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match cli.verbose {
        0 => {} // default (info)
        1 => {
            logger.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            logger.filter_level(log::LevelFilter::Trace);
        }
    }
    logger.init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            match e.downcast_ref::<gcmemcard_core::Error>() {
                Some(gcmemcard_core::Error::Interrupted { block }) => {
                    eprintln!("Stopped before block {}", block);
                    ExitCode::from(EXIT_INTERRUPTED)
                }
                Some(err) if err.is_preflight() => {
                    eprintln!("Nothing was written to the card");
                    ExitCode::FAILURE
                }
                _ => ExitCode::FAILURE,
            }
        }
    }
}
