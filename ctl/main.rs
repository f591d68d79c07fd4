#![forbid(unsafe_code)]

//! `clockd-ctl`: local CLI companion for `clockd`.
//!
//! Connects to the daemon's control socket and issues one binary command per
//! invocation. Application ids are given in hex, as shown by `context`.

use clap::{Parser, Subcommand};

use clockd::ipc::{IpcClient, ResultCode, ServiceError};
use clockd::models::clock::{ClockModule, ProfileKind};
use clockd::AppError;

#[derive(Debug, Parser)]
#[command(
    name = "clockd-ctl",
    about = "Local CLI for the clockd daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "clockd")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the daemon version string and control API version.
    Version,

    /// Print the current clock context as JSON.
    Context,

    /// Ask the daemon to shut down.
    Exit,

    /// Number of profiles configured for an application.
    ProfileCount {
        /// Application id in hex.
        #[arg(value_parser = parse_application_id)]
        application_id: u64,
    },

    /// Print one configured clock in MHz.
    GetProfile {
        /// Application id in hex.
        #[arg(value_parser = parse_application_id)]
        application_id: u64,
        /// Clock domain.
        #[arg(value_enum)]
        module: ClockModule,
        /// Power profile.
        #[arg(value_enum)]
        profile: ProfileKind,
    },

    /// Store one clock in MHz (0 removes it).
    SetProfile {
        /// Application id in hex.
        #[arg(value_parser = parse_application_id)]
        application_id: u64,
        /// Clock domain.
        #[arg(value_enum)]
        module: ClockModule,
        /// Power profile.
        #[arg(value_enum)]
        profile: ProfileKind,
        /// Frequency in MHz.
        mhz: u32,
    },

    /// Turn profile application on.
    Enable,

    /// Turn profile application off.
    Disable,

    /// Set a temporary override in Hz (0 clears it).
    Override {
        /// Clock domain.
        #[arg(value_enum)]
        module: ClockModule,
        /// Frequency in Hz.
        hz: u32,
    },
}

fn main() {
    let args = Cli::parse();

    let mut client = match IpcClient::connect(&args.ipc_name) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is clockd running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&mut client, args.command) {
        eprintln!("Error: {}", describe(&err));
        std::process::exit(1);
    }
}

fn run(client: &mut IpcClient, command: Command) -> clockd::Result<()> {
    client.ensure_api_version()?;

    match command {
        Command::Version => {
            let version = client.version_string()?;
            let api = client.api_version()?;
            println!("clockd {version} (api {api})");
        }
        Command::Context => {
            let context = client.current_context()?;
            let json = serde_json::to_string_pretty(&context)
                .map_err(|err| AppError::Protocol(format!("failed to render context: {err}")))?;
            println!("{json}");
        }
        Command::Exit => {
            client.exit()?;
            println!("OK");
        }
        Command::ProfileCount { application_id } => {
            println!("{}", client.profile_count(application_id)?);
        }
        Command::GetProfile {
            application_id,
            module,
            profile,
        } => {
            println!("{}", client.profile_mhz(application_id, module, profile)?);
        }
        Command::SetProfile {
            application_id,
            module,
            profile,
            mhz,
        } => {
            client.set_profile_mhz(application_id, module, profile, mhz)?;
            println!("OK");
        }
        Command::Enable => {
            client.set_enabled(true)?;
            println!("OK");
        }
        Command::Disable => {
            client.set_enabled(false)?;
            println!("OK");
        }
        Command::Override { module, hz } => {
            client.set_override_hz(module, hz)?;
            println!("OK");
        }
    }

    Ok(())
}

/// Human-readable message for remote result codes.
fn describe(err: &AppError) -> String {
    match err {
        AppError::Remote(code) => match ServiceError::from_code(ResultCode::from_raw(*code)) {
            Some(ServiceError::Generic) => "request rejected by daemon".into(),
            Some(ServiceError::ConfigNotLoaded) => "profiles are not loaded yet".into(),
            Some(ServiceError::ConfigSaveFailed) => "daemon failed to save profiles".into(),
            None => err.to_string(),
        },
        other => other.to_string(),
    }
}

fn parse_application_id(raw: &str) -> Result<u64, String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|err| format!("invalid application id '{raw}': {err}"))
}
