//! Purpose: `krb5-sync` CLI entry point.
//! Role: Binary crate root; parses args, loads config, runs one action, reports errors.
//! Invariants: Exit code 0 only when the requested action fully succeeded.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; TTYs get plain text.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Passwords are never logged or echoed.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use krb5_sync::api::{Error, ErrorKind, SyncConfig, to_exit_code};
use krb5_sync::config::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(RunOutcome::ok());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `krb5-sync --help`."));
            }
        },
    };

    init_tracing();

    let action = command_dispatch::resolve_action(&cli)?;
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.queue_dir {
        config.queue_dir = Some(dir);
    }
    command_dispatch::dispatch(action, &config)
}

#[derive(Parser)]
#[command(
    name = "krb5-sync",
    version,
    about = "Push Kerberos password and account status changes to Active Directory",
    long_about = None,
    after_help = r#"EXAMPLES
  $ krb5-sync -p 'new password' alice     # set the AD password now
  $ krb5-sync -d alice                     # disable alice in AD
  $ krb5-sync -q -e alice                  # enable, queuing if AD is unreachable
  $ krb5-sync -f /var/spool/krb5-sync/alice-ad-enable-20240101T000000Z-00
  $ krb5-sync --drain                      # replay every queued change
  $ krb5-sync --list

CONFIGURATION
  Read from --config, else $KRB5_SYNC_CONFIG, else /etc/krb5-sync.toml."#
)]
struct Cli {
    #[arg(long, help = "Configuration file (TOML)", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, help = "Queue directory (overrides queue_dir)", value_hint = ValueHint::DirPath)]
    queue_dir: Option<PathBuf>,
    #[arg(short = 'd', long, help = "Disable the account")]
    disable: bool,
    #[arg(short = 'e', long, help = "Enable the account")]
    enable: bool,
    #[arg(short = 'p', long, value_name = "PASS", help = "Set the account password")]
    password: Option<String>,
    #[arg(
        short = 'q',
        long,
        help = "Queue the change if a change is pending or delivery fails"
    )]
    queue: bool,
    #[arg(
        short = 'f',
        long,
        value_name = "FILE",
        help = "Replay one queued change and remove it on success",
        value_hint = ValueHint::FilePath
    )]
    file: Option<PathBuf>,
    #[arg(long, help = "Replay every queued change, oldest first")]
    drain: bool,
    #[arg(long, help = "List queued changes")]
    list: bool,
    #[arg(value_name = "USER", help = "Account to change")]
    user: Option<String>,
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig, Error> {
    let implicit = path.is_none() && std::env::var_os(CONFIG_ENV_VAR).is_none();
    if implicit && !Path::new(DEFAULT_CONFIG_PATH).exists() {
        return Ok(SyncConfig::default());
    }
    SyncConfig::load(path)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Config => "configuration error".to_string(),
        ErrorKind::System => "system error".to_string(),
        ErrorKind::Parse => "malformed input".to_string(),
        ErrorKind::Delivery => "delivery failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("krb5-sync: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{error_json, error_text};
    use krb5_sync::api::{Error, ErrorKind};

    #[test]
    fn error_json_carries_kind_message_path_and_causes() {
        let err = Error::system(
            "cannot open lock file",
            std::path::Path::new("/q/.lock"),
            std::io::Error::from_raw_os_error(libc::EACCES),
        );
        let value = error_json(&err);
        let inner = value.get("error").expect("error object");
        assert_eq!(inner["kind"], "System");
        assert_eq!(inner["message"], "cannot open lock file");
        assert_eq!(inner["path"], "/q/.lock");
        assert_eq!(inner["causes"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn error_text_falls_back_to_kind_message() {
        let err = Error::new(ErrorKind::Delivery).with_hint("retry later");
        assert_eq!(error_text(&err), "krb5-sync: delivery failed\nhint: retry later");
    }
}
