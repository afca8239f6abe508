//-
// Copyright (c) 2026, The Relaymap Developers
//
// This file is part of Relaymap.
//
// Relaymap is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Relaymap is distributed in the hope that  it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Relaymap. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use super::serve;
use crate::support::sysexits::*;
use crate::support::system_config::{SystemConfig, DEFAULT_CONFIG_PATH};

/// Relay new-mail events between mail delivery agents and groupware
/// server processes through a message broker.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// Fork into the background and log to syslog.
    #[structopt(short = "D", long)]
    daemon: bool,

    /// Log at debug level.
    #[structopt(short, long)]
    debug: bool,

    /// Path of the configuration file
    /// [default: /etc/relaymap/relaymap.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
}

pub fn main() {
    let options = Options::from_args();
    let config = load_config(options.config.as_deref());

    let level = if options.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    if options.daemon {
        if let Err(e) = daemonize() {
            eprintln!("Failed to daemonise: {}", e);
            EX_OSERR.exit();
        }
        init_syslog(level);
    } else {
        init_stderr_log(level);
    }

    serve::run(&config).exit()
}

fn load_config(explicit: Option<&Path>) -> SystemConfig {
    let path = explicit
        .map(Path::to_owned)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());

    let mut config_toml = Vec::new();
    match fs::File::open(&path)
        .and_then(|mut f| f.read_to_end(&mut config_toml))
    {
        Ok(_) => (),
        // The default config being absent just means defaults throughout;
        // an explicitly named file must exist
        Err(e) if explicit.is_none() => {
            let _ = e;
            return SystemConfig::default();
        },
        Err(e) => {
            eprintln!("Error reading '{}': {}", path.display(), e);
            EX_CONFIG.exit();
        },
    }

    match toml::from_slice(&config_toml) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error in config file at '{}': {}", path.display(), e);
            EX_CONFIG.exit()
        },
    }
}

fn init_stderr_log(level: log::LevelFilter) {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .expect("Failed to initialise logging");
}

fn init_syslog(level: log::LevelFilter) {
    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_DAEMON,
        hostname: None,
        process: env!("CARGO_PKG_NAME").to_owned(),
        pid: nix::unistd::getpid().as_raw(),
    };

    let logger = syslog::unix(formatter).expect("Failed to connect to syslog");
    log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
        .map(|_| log::set_max_level(level))
        .expect("Failed to initialise logging");
}

/// Detach from the controlling terminal: fork, start a new session, fork
/// again, and move to the filesystem root.
fn daemonize() -> nix::Result<()> {
    use nix::unistd::{chdir, fork, setsid, ForkResult};

    match fork()? {
        ForkResult::Parent { .. } => EX_OK.exit(),
        ForkResult::Child => (),
    }
    setsid()?;
    match fork()? {
        ForkResult::Parent { .. } => EX_OK.exit(),
        ForkResult::Child => (),
    }
    chdir("/")
}
