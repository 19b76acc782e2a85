//! Purpose: Concrete delivery transport that hands each change to an external program.
//! Exports: `CommandDelivery`.
//! Role: Lets the CLI and hosts reach the downstream directory without linking a transport.
//! Invariants: The password only travels on the child's stdin, never on argv.
//! Invariants: Every failure (spawn, I/O, non-zero exit) is `ErrorKind::Delivery`.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::DeliveryConfig;
use crate::core::delivery::Delivery;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::Operation;
use crate::core::principal::Principal;

/// Runs `<program> <args...> <operation> <account>` once per change.
#[derive(Clone, Debug)]
pub struct CommandDelivery {
    program: String,
    args: Vec<String>,
}

impl CommandDelivery {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self, Error> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(Error::new(ErrorKind::Config).with_message("delivery.command must name a program"));
        };
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

impl Delivery for CommandDelivery {
    fn deliver(
        &self,
        account: &Principal,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<(), Error> {
        let account_name = account.to_string();
        debug!(program = %self.program, %operation, account = %account_name, "running delivery command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(operation.as_str())
            .arg(&account_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                Error::new(ErrorKind::Delivery)
                    .with_message(format!("cannot run delivery command {}", self.program))
                    .with_source(err)
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = match password {
                Some(password) => writeln!(stdin, "{password}"),
                None => Ok(()),
            };
            // A program that exits without reading stdin is judged by its status.
            if let Err(err) = written {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::new(ErrorKind::Delivery)
                        .with_message("cannot pass password to delivery command")
                        .with_source(err));
                }
            }
        }

        let output = child.wait_with_output().map_err(|err| {
            Error::new(ErrorKind::Delivery)
                .with_message("cannot wait for delivery command")
                .with_source(err)
        })?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let status = match output.status.code() {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        let message = if stderr.is_empty() {
            format!("AD {} change for {account_name} failed ({status})", change_label(operation))
        } else {
            format!(
                "AD {} change for {account_name} failed ({status}): {stderr}",
                change_label(operation)
            )
        };
        Err(Error::new(ErrorKind::Delivery).with_message(message))
    }
}

fn change_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Password => "password",
        Operation::Enable | Operation::Disable => "status",
    }
}

#[cfg(test)]
mod tests {
    use super::CommandDelivery;
    use crate::config::DeliveryConfig;
    use crate::core::delivery::Delivery;
    use crate::core::error::ErrorKind;
    use crate::core::key::Operation;
    use crate::core::principal::Principal;

    fn sh(script: &str) -> CommandDelivery {
        CommandDelivery::new("sh", vec!["-c".to_string(), script.to_string(), "delivery".to_string()])
    }

    fn alice() -> Principal {
        Principal::parse("alice@EXAMPLE.COM", None).expect("principal")
    }

    #[test]
    fn passes_operation_account_and_password() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        let script = format!(
            "read pw; printf '%s %s %s' \"$1\" \"$2\" \"$pw\" > {}",
            out.display()
        );
        sh(&script)
            .deliver(&alice(), Operation::Password, Some("s3cret"))
            .expect("deliver");
        assert_eq!(
            std::fs::read_to_string(&out).expect("read"),
            "password alice@EXAMPLE.COM s3cret"
        );
    }

    #[test]
    fn non_zero_exit_is_a_delivery_error_with_stderr() {
        let err = sh("echo 'ldap bind failed' >&2; exit 3")
            .deliver(&alice(), Operation::Disable, None)
            .expect_err("failure");
        assert_eq!(err.kind(), ErrorKind::Delivery);
        let message = err.message().expect("message");
        assert!(message.contains("exit status 3"), "{message}");
        assert!(message.contains("ldap bind failed"), "{message}");
    }

    #[test]
    fn missing_program_is_a_delivery_error() {
        let delivery = CommandDelivery::new("/nonexistent/krb5-sync-hook", Vec::new());
        let err = delivery
            .deliver(&alice(), Operation::Enable, None)
            .expect_err("spawn failure");
        assert_eq!(err.kind(), ErrorKind::Delivery);
    }

    #[test]
    fn from_config_splits_program_and_args() {
        let config = DeliveryConfig {
            command: vec!["true".to_string()],
        };
        let delivery = CommandDelivery::from_config(&config).expect("delivery");
        delivery
            .deliver(&alice(), Operation::Password, Some("ignored"))
            .expect("deliver");

        let empty = DeliveryConfig { command: Vec::new() };
        assert_eq!(
            CommandDelivery::from_config(&empty).expect_err("empty").kind(),
            ErrorKind::Config
        );
    }
}
