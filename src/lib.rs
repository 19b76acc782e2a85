//! Purpose: Library crate behind the `krb5-sync` CLI and kadmin plugin hosts.
//! Exports: `api` (public surface), `core` (queue storage, keys, replay, errors), `config`.
//! Role: Propagates Kerberos password and status changes downstream, queuing durably on failure.
//! Invariants: All structural queue mutations happen under the queue directory lock.
//! Invariants: Configuration is passed explicitly; there is no process-wide state.
pub mod api;
pub mod config;
pub mod core;
