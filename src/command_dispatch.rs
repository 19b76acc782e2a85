//! Purpose: Validate CLI flag combinations and run the selected `krb5-sync` action.
//! Exports: `resolve_action`, `dispatch`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate action execution.
//! Invariants: Direct actions fail the process when delivery fails; `-q` queues instead.
//! Invariants: Replay and drain never delete an entry whose delivery failed.

use super::*;

use krb5_sync::api::{
    CommandDelivery, Delivery, DrainReport, Operation, Principal, Queue, QueueReason, SkipReason,
    SyncOutcome, SyncPolicy, drain, replay,
};

const USAGE_HINT: &str = "Usage: krb5-sync [-q] [-d | -e] [-p <pass>] <user> | -f <file> | --drain | --list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Action {
    Change {
        user: String,
        password: Option<String>,
        status: Option<bool>,
        queue: bool,
    },
    Replay(PathBuf),
    Drain,
    List,
}

pub(super) fn resolve_action(cli: &Cli) -> Result<Action, Error> {
    let has_change = cli.enable || cli.disable || cli.password.is_some();
    let modes = [cli.file.is_some(), cli.drain, cli.list]
        .iter()
        .filter(|set| **set)
        .count();

    if cli.enable && cli.disable {
        return Err(usage("cannot specify both -d and -e"));
    }
    if modes > 1 || (modes == 1 && (has_change || cli.queue)) {
        return Err(usage("must specify queue file or action, not both"));
    }
    if modes == 1 {
        if cli.user.is_some() {
            return Err(usage("no user may be given with -f, --drain, or --list"));
        }
        if let Some(file) = &cli.file {
            return Ok(Action::Replay(file.clone()));
        }
        return Ok(if cli.drain { Action::Drain } else { Action::List });
    }

    let Some(user) = cli.user.clone() else {
        return Err(usage("no user specified"));
    };
    if !has_change {
        return Err(usage("no action specified"));
    }
    let status = if cli.enable || cli.disable {
        Some(cli.enable)
    } else {
        None
    };
    Ok(Action::Change {
        user,
        password: cli.password.clone(),
        status,
        queue: cli.queue,
    })
}

pub(super) fn dispatch(action: Action, config: &SyncConfig) -> Result<RunOutcome, Error> {
    let default_realm = config.default_realm.as_deref();
    match action {
        Action::Change {
            user,
            password,
            status,
            queue,
        } => {
            let principal = Principal::parse(&user, default_realm)?;
            let transport = Transport::from_config(config)?;
            if queue {
                let policy = SyncPolicy::new(config, &transport);
                if let Some(password) = password.as_deref() {
                    let outcome = policy.sync_password(&principal, Some(password))?;
                    report_outcome("password", &user, &outcome);
                }
                if let Some(enabled) = status {
                    let outcome = policy.sync_status(&principal, enabled)?;
                    report_outcome("status", &user, &outcome);
                }
            } else {
                if let Some(password) = password.as_deref() {
                    transport.deliver(&principal, Operation::Password, Some(password))?;
                    println!("AD password change for {user} succeeded");
                }
                if let Some(enabled) = status {
                    transport.deliver(&principal, Operation::status(enabled), None)?;
                    println!("AD status change for {user} succeeded");
                }
            }
            Ok(RunOutcome::ok())
        }
        Action::Replay(path) => {
            let transport = Transport::from_config(config)?;
            let outcome = replay(&path, default_realm, &transport)?;
            println!(
                "AD {} change for {} succeeded",
                change_label(outcome.entry.operation),
                outcome.account
            );
            Ok(RunOutcome::ok())
        }
        Action::Drain => {
            let queue = Queue::from_config(config)?;
            let transport = Transport::from_config(config)?;
            let report = drain(&queue, default_realm, &transport)?;
            Ok(report_drain(&report))
        }
        Action::List => {
            let queue = Queue::from_config(config)?;
            for entry in queue.pending()? {
                println!(
                    "{}\t{}\t{}\t{:02}",
                    entry.name, entry.key, entry.timestamp, entry.sequence
                );
            }
            Ok(RunOutcome::ok())
        }
    }
}

/// Delivery selected by configuration; without one, delivery attempts are
/// configuration errors while queue-only flows still work.
enum Transport {
    Command(CommandDelivery),
    Unconfigured,
}

impl Transport {
    fn from_config(config: &SyncConfig) -> Result<Self, Error> {
        match &config.delivery {
            Some(delivery) => Ok(Transport::Command(CommandDelivery::from_config(delivery)?)),
            None => Ok(Transport::Unconfigured),
        }
    }
}

impl Delivery for Transport {
    fn deliver(
        &self,
        account: &Principal,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<(), Error> {
        match self {
            Transport::Command(command) => command.deliver(account, operation, password),
            Transport::Unconfigured => Err(Error::new(ErrorKind::Config)
                .with_message("no delivery command configured")
                .with_hint("Set [delivery] command in the krb5-sync configuration file.")),
        }
    }
}

fn report_outcome(change: &str, user: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Delivered => println!("AD {change} change for {user} succeeded"),
        SyncOutcome::Queued { path, reason } => {
            let why = match reason {
                QueueReason::Conflict => "an earlier change is pending".to_string(),
                QueueReason::Forced => "queue_only is set".to_string(),
                QueueReason::DeliveryFailed(message) => message.clone(),
            };
            println!("AD {change} change for {user} queued as {} ({why})", path.display());
        }
        SyncOutcome::Skipped(reason) => {
            let why = match reason {
                SkipReason::NoPassword => "no password",
                SkipReason::Instance => "instance is not propagated",
                SkipReason::BaseInstanceExists => "base instance is propagated instead",
            };
            println!("AD {change} change for {user} skipped ({why})");
        }
    }
}

fn report_drain(report: &DrainReport) -> RunOutcome {
    for (_, err) in &report.failed {
        emit_error(err);
    }
    println!(
        "replayed {}, failed {}, held back {}",
        report.replayed.len(),
        report.failed.len(),
        report.skipped.len()
    );
    match report.failed.first() {
        Some((_, err)) => RunOutcome::with_code(to_exit_code(err.kind())),
        None => RunOutcome::ok(),
    }
}

fn change_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Password => "password",
        Operation::Enable | Operation::Disable => "status",
    }
}

fn usage(message: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(message)
        .with_hint(USAGE_HINT)
}
