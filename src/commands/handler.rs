//! Command Dispatcher
//!
//! Maps decoded wire [`Command`]s onto lock store calls and builds
//! typed replies. One dispatcher lives per connection and owns the
//! connection's session state machine:
//!
//! ```text
//! Unauthenticated ──pass <secret>──> Unbound ──conn [id]──> Bound
//! ```
//!
//! (Connections start at `Unbound` when no password is configured.)
//!
//! ## Verb table
//!
//! | verb | args | reply |
//! |------|------|-------|
//! | `pass` | secret | `+1` or auth error (close) |
//! | `conn` | [client_id] | `+<client_id>` |
//! | `conninfo` | - | array `[client_id, peer_addr]` |
//! | `aq` / `aqr` | lock | `+1` / `+0` |
//! | `release` | lock | `+1` / `+0` |
//! | `locked` | lock | `+1` / `+0` |
//! | `sigset` / `sigexists` / `sigdel` | lock sig | `+1` / `+0` |
//! | `ping` | - | `+pong` |
//! | `find` | pattern | array of `[lock_id, acquired_at]` |
//! | `stats` | - | array of name/value pairs |
//! | `shutdown` / `dump` | - | `+1` (config-gated) |
//!
//! Every verb has a fixed arity with all arguments non-empty; a
//! violation returns a wrong-arguments error without touching state.
//! Exactly one reply is produced per command.

use crate::context::ServerContext;
use crate::protocol::{Command, WireValue};
use crate::store::StoreError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The closed error table for command replies.
///
/// Encoded on the wire as `-<code> <message>\r\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("wrong arguments")]
    WrongArguments,
    #[error("authentication failed")]
    AuthFailed,
    #[error("connection required")]
    ConnectionRequired,
    #[error("already connected")]
    AlreadyConnected,
    #[error("server terminating")]
    Terminating,
    #[error("shutdown disabled")]
    ShutdownDisabled,
}

impl ReplyError {
    /// The numeric wire code for this error.
    pub fn code(&self) -> u16 {
        match self {
            ReplyError::UnknownCommand => 100,
            ReplyError::WrongArguments => 101,
            ReplyError::AuthFailed => 102,
            ReplyError::ConnectionRequired => 103,
            ReplyError::AlreadyConnected => 104,
            ReplyError::Terminating => 105,
            ReplyError::ShutdownDisabled => 106,
        }
    }

    pub fn to_wire(self) -> WireValue {
        WireValue::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Per-connection session state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionPhase {
    /// Password configured, `pass` not yet presented
    Unauthenticated,
    /// Authenticated (or no password configured), no identity bound
    Unbound,
    /// Identity bound via `conn`
    Bound(String),
}

/// What the connection handler should do after sending the reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send the reply and keep the connection open
    Reply(WireValue),
    /// Send the reply, then close the connection
    ReplyAndClose(WireValue),
}

impl Outcome {
    pub fn reply(&self) -> &WireValue {
        match self {
            Outcome::Reply(v) | Outcome::ReplyAndClose(v) => v,
        }
    }
}

/// Dispatches commands for one connection.
pub struct CommandHandler {
    ctx: Arc<ServerContext>,
    /// Peer address of this connection, recorded into the store on bind
    peer: String,
    phase: SessionPhase,
}

impl CommandHandler {
    pub fn new(ctx: Arc<ServerContext>, peer: String) -> Self {
        let phase = if ctx.config().password.is_some() {
            SessionPhase::Unauthenticated
        } else {
            SessionPhase::Unbound
        };
        Self { ctx, peer, phase }
    }

    /// The bound client id, once `conn` has succeeded.
    pub fn client_id(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Bound(id) => Some(id),
            _ => None,
        }
    }

    /// Executes one command and returns its reply.
    pub fn execute(&mut self, cmd: Command) -> Outcome {
        // Post-kill commands get the fixed terminating reply, never dispatch.
        if self.ctx.lifecycle().is_terminating() {
            return Outcome::Reply(ReplyError::Terminating.to_wire());
        }

        self.ctx.stats().command_processed();

        // Auth gate: when a password is configured, `pass` must come first.
        if self.phase == SessionPhase::Unauthenticated {
            return self.auth_gate(cmd);
        }

        match self.dispatch(cmd) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Reply(e.to_wire()),
        }
    }

    fn auth_gate(&mut self, cmd: Command) -> Outcome {
        if cmd.verb != "pass" {
            return Outcome::ReplyAndClose(ReplyError::AuthFailed.to_wire());
        }
        if let Err(e) = check_args(&cmd, 1) {
            return Outcome::Reply(e.to_wire());
        }
        if self.ctx.config().password.as_deref() == Some(cmd.args[0].as_str()) {
            self.phase = SessionPhase::Unbound;
            Outcome::Reply(WireValue::boolean(true))
        } else {
            warn!(peer = %self.peer, "authentication failed");
            Outcome::ReplyAndClose(ReplyError::AuthFailed.to_wire())
        }
    }

    fn dispatch(&mut self, cmd: Command) -> Result<Outcome, ReplyError> {
        match cmd.verb.as_str() {
            "pass" => self.cmd_pass(&cmd),
            "conn" => self.cmd_conn(&cmd),
            "conninfo" => self.cmd_conninfo(&cmd),
            "aq" => self.cmd_acquire(&cmd, false),
            "aqr" => self.cmd_acquire(&cmd, true),
            "release" => self.cmd_release(&cmd),
            "locked" => self.cmd_locked(&cmd),
            "sigset" => self.cmd_sigset(&cmd),
            "sigexists" => self.cmd_sigexists(&cmd),
            "sigdel" => self.cmd_sigdel(&cmd),
            "ping" => self.cmd_ping(&cmd),
            "find" => self.cmd_find(&cmd),
            "stats" => self.cmd_stats(&cmd),
            "shutdown" => self.cmd_shutdown(&cmd),
            "dump" => self.cmd_dump(&cmd),
            _ => Err(ReplyError::UnknownCommand),
        }
    }

    /// The bound client id, or the connection-required error.
    fn bound_client(&self) -> Result<String, ReplyError> {
        match &self.phase {
            SessionPhase::Bound(id) => Ok(id.clone()),
            _ => Err(ReplyError::ConnectionRequired),
        }
    }

    /// Converts a boolean store result into a reply, mapping store
    /// failures to replies without dropping any.
    fn bool_reply(&self, result: Result<bool, StoreError>) -> Result<Outcome, ReplyError> {
        match result {
            Ok(b) => Ok(Outcome::Reply(WireValue::boolean(b))),
            Err(e) => Ok(Outcome::Reply(self.store_failure(e))),
        }
    }

    fn store_failure(&self, e: StoreError) -> WireValue {
        match e {
            StoreError::Disabled => {
                // A mutating call slipped past the terminating gate.
                error!(peer = %self.peer, "mutating store call after shutdown was requested");
                ReplyError::Terminating.to_wire()
            }
            StoreError::Pattern(_) => ReplyError::WrongArguments.to_wire(),
            StoreError::Snapshot(err) => {
                error!(error = %err, "snapshot operation failed");
                WireValue::boolean(false)
            }
        }
    }

    // ========================================================================
    // Verbs
    // ========================================================================

    /// `pass <secret>` after authentication has already happened (or
    /// with no password configured) re-validates the secret.
    fn cmd_pass(&mut self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 1)?;
        match self.ctx.config().password.as_deref() {
            None => Ok(Outcome::Reply(WireValue::boolean(true))),
            Some(secret) if secret == cmd.args[0] => {
                Ok(Outcome::Reply(WireValue::boolean(true)))
            }
            Some(_) => Ok(Outcome::ReplyAndClose(ReplyError::AuthFailed.to_wire())),
        }
    }

    /// `conn [client_id]` binds an identity to this connection.
    ///
    /// A supplied id cancels any pending release window for that
    /// client (reconnect-before-timeout). Re-`conn` on a bound
    /// connection is a hard error.
    fn cmd_conn(&mut self, cmd: &Command) -> Result<Outcome, ReplyError> {
        if matches!(self.phase, SessionPhase::Bound(_)) {
            return Err(ReplyError::AlreadyConnected);
        }
        if cmd.args.len() > 1 || cmd.args.iter().any(|a| a.is_empty()) {
            return Err(ReplyError::WrongArguments);
        }

        let (client_id, reclaimed) = match cmd.args.first() {
            Some(id) => {
                let cancelled = match self.ctx.store().unrelease_all(id) {
                    Ok(cancelled) => cancelled,
                    Err(e) => return Ok(Outcome::Reply(self.store_failure(e))),
                };
                (id.clone(), cancelled)
            }
            None => (Uuid::new_v4().to_string(), false),
        };

        if let Err(e) = self
            .ctx
            .store()
            .set_client_last_address(&client_id, &self.peer)
        {
            return Ok(Outcome::Reply(self.store_failure(e)));
        }

        info!(client = %client_id, peer = %self.peer, reclaimed, "client bound");
        self.phase = SessionPhase::Bound(client_id.clone());
        Ok(Outcome::Reply(WireValue::simple(client_id)))
    }

    fn cmd_conninfo(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 0)?;
        let client = self.bound_client()?;
        Ok(Outcome::Reply(WireValue::array(vec![
            WireValue::bulk(client.into_bytes()),
            WireValue::bulk(self.peer.clone().into_bytes()),
        ])))
    }

    fn cmd_acquire(&self, cmd: &Command, reentrant: bool) -> Result<Outcome, ReplyError> {
        check_args(cmd, 1)?;
        let client = self.bound_client()?;
        self.bool_reply(self.ctx.store().acquire(&client, &cmd.args[0], reentrant))
    }

    fn cmd_release(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 1)?;
        let client = self.bound_client()?;
        self.bool_reply(self.ctx.store().release(&client, &cmd.args[0]))
    }

    fn cmd_locked(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 1)?;
        self.bound_client()?;
        Ok(Outcome::Reply(WireValue::boolean(
            self.ctx.store().locked(&cmd.args[0]),
        )))
    }

    fn cmd_sigset(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 2)?;
        self.bound_client()?;
        self.bool_reply(self.ctx.store().add_signal(&cmd.args[0], &cmd.args[1]))
    }

    fn cmd_sigexists(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 2)?;
        self.bound_client()?;
        Ok(Outcome::Reply(WireValue::boolean(
            self.ctx.store().has_signal(&cmd.args[0], &cmd.args[1]),
        )))
    }

    fn cmd_sigdel(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 2)?;
        self.bound_client()?;
        self.bool_reply(self.ctx.store().remove_signal(&cmd.args[0], &cmd.args[1]))
    }

    fn cmd_ping(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 0)?;
        self.bound_client()?;
        Ok(Outcome::Reply(WireValue::simple("pong")))
    }

    /// `find <pattern>` returns `[lock_id, acquired_at]` pairs, with
    /// the acquire time as float unix seconds.
    fn cmd_find(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 1)?;
        self.bound_client()?;
        let matches = match self.ctx.store().find(&cmd.args[0]) {
            Ok(matches) => matches,
            Err(e) => return Ok(Outcome::Reply(self.store_failure(e))),
        };
        let entries = matches
            .into_iter()
            .map(|(id, at_ms)| {
                WireValue::array(vec![
                    WireValue::bulk(id.into_bytes()),
                    WireValue::float(at_ms as f64 / 1000.0),
                ])
            })
            .collect();
        Ok(Outcome::Reply(WireValue::array(entries)))
    }

    fn cmd_stats(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 0)?;
        self.bound_client()?;

        let store = self.ctx.store().stats_snapshot();
        let conn = self.ctx.stats().snapshot();

        let pairs: Vec<(&str, i64)> = vec![
            ("locks", store.locks_held as i64),
            ("clients", store.clients_known as i64),
            ("signals", store.signals_total as i64),
            ("pending_releases", store.pending_releases as i64),
            ("acquires", store.acquires as i64),
            ("releases", store.releases as i64),
            ("released_by_maintenance", store.released_by_maintenance as i64),
            ("connections_accepted", conn.connections_accepted as i64),
            ("active_connections", conn.active_connections as i64),
            ("commands_processed", conn.commands_processed as i64),
            ("bytes_read", conn.bytes_read as i64),
            ("bytes_written", conn.bytes_written as i64),
            ("uptime_secs", self.ctx.uptime_secs() as i64),
        ];

        let mut entries = Vec::with_capacity(pairs.len() * 2);
        for (name, value) in pairs {
            entries.push(WireValue::bulk(name.as_bytes().to_vec()));
            entries.push(WireValue::integer(value));
        }
        Ok(Outcome::Reply(WireValue::array(entries)))
    }

    /// `shutdown` replies success first, then trips the coordinator;
    /// the reply is flushed because process exit waits on the
    /// in-flight command counter.
    fn cmd_shutdown(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 0)?;
        self.bound_client()?;
        if !self.ctx.config().enable_shutdown {
            return Err(ReplyError::ShutdownDisabled);
        }
        info!(peer = %self.peer, "shutdown requested by client");
        self.ctx.lifecycle().request_kill();
        Ok(Outcome::Reply(WireValue::boolean(true)))
    }

    /// Debug verb: write the snapshot now, without shutting down.
    fn cmd_dump(&self, cmd: &Command) -> Result<Outcome, ReplyError> {
        check_args(cmd, 0)?;
        self.bound_client()?;
        if !self.ctx.config().enable_shutdown {
            return Err(ReplyError::ShutdownDisabled);
        }
        match self.ctx.store().dump(&self.ctx.config().snapshot_path) {
            Ok(()) => Ok(Outcome::Reply(WireValue::boolean(true))),
            Err(e) => Ok(Outcome::Reply(self.store_failure(e))),
        }
    }
}

/// Fixed-arity validation: exact count, every argument non-empty.
fn check_args(cmd: &Command, arity: usize) -> Result<(), ReplyError> {
    if cmd.args.len() != arity || cmd.args.iter().any(|a| a.is_empty()) {
        return Err(ReplyError::WrongArguments);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn make_ctx(config: Config) -> Arc<ServerContext> {
        Arc::new(ServerContext::new(config))
    }

    fn make_handler(ctx: &Arc<ServerContext>) -> CommandHandler {
        CommandHandler::new(Arc::clone(ctx), "127.0.0.1:50000".to_string())
    }

    fn cmd(verb: &str, args: &[&str]) -> Command {
        Command::new(verb, args.iter().map(|s| s.to_string()).collect())
    }

    fn bound_handler(ctx: &Arc<ServerContext>, id: &str) -> CommandHandler {
        let mut handler = make_handler(ctx);
        let outcome = handler.execute(cmd("conn", &[id]));
        assert_eq!(outcome.reply(), &WireValue::simple(id));
        handler
    }

    #[test]
    fn test_conn_generates_uuid() {
        let ctx = make_ctx(Config::default());
        let mut handler = make_handler(&ctx);

        let outcome = handler.execute(cmd("conn", &[]));
        let WireValue::Simple(id) = outcome.reply() else {
            panic!("expected simple reply");
        };
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(handler.client_id(), Some(id.as_str()));

        // The peer address was recorded.
        assert_eq!(
            ctx.store().get_client_last_address(id),
            Some("127.0.0.1:50000".to_string())
        );
    }

    #[test]
    fn test_reconn_is_a_hard_error() {
        let ctx = make_ctx(Config::default());
        let mut handler = bound_handler(&ctx, "c1");

        let outcome = handler.execute(cmd("conn", &["c2"]));
        assert_eq!(outcome.reply(), &ReplyError::AlreadyConnected.to_wire());
        assert_eq!(handler.client_id(), Some("c1"));
    }

    #[test]
    fn test_commands_require_conn() {
        let ctx = make_ctx(Config::default());
        let mut handler = make_handler(&ctx);

        for c in [
            cmd("aq", &["L"]),
            cmd("release", &["L"]),
            cmd("locked", &["L"]),
            cmd("ping", &[]),
            cmd("stats", &[]),
        ] {
            let outcome = handler.execute(c);
            assert_eq!(outcome.reply(), &ReplyError::ConnectionRequired.to_wire());
            assert!(matches!(outcome, Outcome::Reply(_)));
        }
    }

    #[test]
    fn test_acquire_release_booleans() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        let mut b = bound_handler(&ctx, "b");

        assert_eq!(a.execute(cmd("aq", &["L1"])).reply(), &WireValue::boolean(true));
        assert_eq!(b.execute(cmd("aq", &["L1"])).reply(), &WireValue::boolean(false));
        assert_eq!(b.execute(cmd("locked", &["L1"])).reply(), &WireValue::boolean(true));

        assert_eq!(a.execute(cmd("release", &["L1"])).reply(), &WireValue::boolean(true));
        assert_eq!(b.execute(cmd("aq", &["L1"])).reply(), &WireValue::boolean(true));
    }

    #[test]
    fn test_reentrant_verbs() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");

        assert_eq!(a.execute(cmd("aqr", &["L"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("aqr", &["L"])).reply(), &WireValue::boolean(true));
        // Non-reentrant re-acquire fails even for the holder.
        assert_eq!(a.execute(cmd("aq", &["L"])).reply(), &WireValue::boolean(false));

        assert_eq!(a.execute(cmd("release", &["L"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("locked", &["L"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("release", &["L"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("locked", &["L"])).reply(), &WireValue::boolean(false));
    }

    #[test]
    fn test_signal_verbs() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");

        assert_eq!(a.execute(cmd("sigset", &["L", "Paused"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("sigexists", &["L", "paused"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("sigdel", &["L", "PAUSED"])).reply(), &WireValue::boolean(true));
        assert_eq!(a.execute(cmd("sigexists", &["L", "paused"])).reply(), &WireValue::boolean(false));
    }

    #[test]
    fn test_ping() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        assert_eq!(a.execute(cmd("ping", &[])).reply(), &WireValue::simple("pong"));
    }

    #[test]
    fn test_find_shape() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        a.execute(cmd("aq", &["jobs/1"]));
        a.execute(cmd("aq", &["other"]));

        let outcome = a.execute(cmd("find", &["jobs/*"]));
        let WireValue::Array(entries) = outcome.reply() else {
            panic!("expected array reply");
        };
        assert_eq!(entries.len(), 1);
        let WireValue::Array(pair) = &entries[0] else {
            panic!("expected pair");
        };
        assert_eq!(pair[0], WireValue::bulk(&b"jobs/1"[..]));
        assert!(matches!(pair[1], WireValue::Float(at) if at > 0.0));
    }

    #[test]
    fn test_find_bad_pattern_is_argument_error() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        let outcome = a.execute(cmd("find", &["["]));
        assert_eq!(outcome.reply(), &ReplyError::WrongArguments.to_wire());
    }

    #[test]
    fn test_stats_shape() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        a.execute(cmd("aq", &["L"]));

        let outcome = a.execute(cmd("stats", &[]));
        let WireValue::Array(entries) = outcome.reply() else {
            panic!("expected array reply");
        };
        // Alternating name/value pairs.
        assert!(entries.len() >= 2 && entries.len() % 2 == 0);
        assert_eq!(entries[0], WireValue::bulk(&b"locks"[..]));
        assert_eq!(entries[1], WireValue::integer(1));
    }

    #[test]
    fn test_arity_violations_do_not_touch_state() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");

        for c in [
            cmd("aq", &[]),
            cmd("aq", &["L", "extra"]),
            cmd("aq", &[""]),
            cmd("sigset", &["L"]),
            cmd("ping", &["x"]),
        ] {
            let outcome = a.execute(c);
            assert_eq!(outcome.reply(), &ReplyError::WrongArguments.to_wire());
        }
        assert_eq!(ctx.store().stats_snapshot().locks_held, 0);
    }

    #[test]
    fn test_unknown_command() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        let outcome = a.execute(cmd("frobnicate", &["x"]));
        assert_eq!(outcome.reply(), &ReplyError::UnknownCommand.to_wire());
        assert!(matches!(outcome, Outcome::Reply(_)));
    }

    #[test]
    fn test_auth_flow() {
        let config = Config {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let ctx = make_ctx(config);

        // Any verb before pass: auth error and close.
        let mut handler = make_handler(&ctx);
        let outcome = handler.execute(cmd("conn", &[]));
        assert_eq!(outcome, Outcome::ReplyAndClose(ReplyError::AuthFailed.to_wire()));

        // Wrong secret: auth error and close.
        let mut handler = make_handler(&ctx);
        let outcome = handler.execute(cmd("pass", &["wrong"]));
        assert_eq!(outcome, Outcome::ReplyAndClose(ReplyError::AuthFailed.to_wire()));

        // Right secret, then normal flow.
        let mut handler = make_handler(&ctx);
        let outcome = handler.execute(cmd("pass", &["hunter2"]));
        assert_eq!(outcome, Outcome::Reply(WireValue::boolean(true)));
        let outcome = handler.execute(cmd("conn", &["c1"]));
        assert_eq!(outcome.reply(), &WireValue::simple("c1"));
    }

    #[test]
    fn test_conn_with_id_cancels_release_window() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        a.execute(cmd("aq", &["L1"]));

        // Simulate the disconnect path.
        ctx.store()
            .release_all("a", std::time::Duration::ZERO)
            .unwrap();

        // Reconnect with the same id: the window is cancelled before
        // maintenance can finalize it.
        let _a2 = bound_handler(&ctx, "a");
        assert_eq!(
            ctx.store()
                .maintenance(std::time::Duration::from_millis(100))
                .unwrap(),
            0
        );
        assert!(ctx.store().locked("L1"));
    }

    #[test]
    fn test_shutdown_disabled_by_default() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        let outcome = a.execute(cmd("shutdown", &[]));
        assert_eq!(outcome.reply(), &ReplyError::ShutdownDisabled.to_wire());
        assert!(!ctx.lifecycle().is_terminating());
    }

    #[test]
    fn test_shutdown_replies_then_kills() {
        let ctx = make_ctx(Config {
            enable_shutdown: true,
            ..Default::default()
        });
        let mut a = bound_handler(&ctx, "a");
        let outcome = a.execute(cmd("shutdown", &[]));
        assert_eq!(outcome.reply(), &WireValue::boolean(true));
        assert!(matches!(outcome, Outcome::Reply(_)));
        assert!(ctx.lifecycle().is_terminating());

        // Everything after the kill gets the terminating reply.
        let outcome = a.execute(cmd("ping", &[]));
        assert_eq!(outcome.reply(), &ReplyError::Terminating.to_wire());
    }

    #[test]
    fn test_dump_verb() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = make_ctx(Config {
            enable_shutdown: true,
            snapshot_path: dir.path().join("livelock.snapshot"),
            ..Default::default()
        });
        let mut a = bound_handler(&ctx, "a");
        a.execute(cmd("aq", &["L1"]));

        let outcome = a.execute(cmd("dump", &[]));
        assert_eq!(outcome.reply(), &WireValue::boolean(true));
        assert!(ctx.config().snapshot_path.exists());
    }

    #[test]
    fn test_conninfo() {
        let ctx = make_ctx(Config::default());
        let mut a = bound_handler(&ctx, "a");
        let outcome = a.execute(cmd("conninfo", &[]));
        assert_eq!(
            outcome.reply(),
            &WireValue::array(vec![
                WireValue::bulk(&b"a"[..]),
                WireValue::bulk(&b"127.0.0.1:50000"[..]),
            ])
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ReplyError::UnknownCommand.code(), 100);
        assert_eq!(ReplyError::WrongArguments.code(), 101);
        assert_eq!(ReplyError::AuthFailed.code(), 102);
        assert_eq!(ReplyError::ConnectionRequired.code(), 103);
        assert_eq!(ReplyError::AlreadyConnected.code(), 104);
        assert_eq!(ReplyError::Terminating.code(), 105);
        assert_eq!(ReplyError::ShutdownDisabled.code(), 106);
    }
}
