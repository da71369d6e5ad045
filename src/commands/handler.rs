//! Command Handler Module
//!
//! One [`CommandHandler`] per client. It resolves the command name, checks
//! arity and subscribe mode, locks the shards the command touches and then
//! dispatches to the command function.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  lookup()   │───>│   lock()    │───>│  dispatch   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                   Database / Keyspace       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands can also be sent as a batch: [`CommandHandler::execute_batch`]
//! pipelines them, [`CommandHandler::execute_atomic`] runs them under one
//! lock with all-or-nothing effects.
//!
//! The handler also owns the client's pub/sub queue. Dropping it removes
//! every subscription the client held.

use super::table::{self, CommandFn, CommandSpec, Exec, ALL_KEYS, NOSCRIPT, PUBSUB_CONTEXT};
use super::ExecContext;
use crate::db::Database;
use crate::error::{CommandError, CommandResult};
use crate::pubsub::{ClientId, PubSubMessage};
use crate::reply::Reply;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Executes commands on behalf of one client.
pub struct CommandHandler {
    /// The shared engine
    db: Arc<Database>,
    /// Identifies this client to the pub/sub broker
    client_id: ClientId,
    /// Handed to the broker on subscribe
    outbox: mpsc::Sender<PubSubMessage>,
    /// Messages for this client's subscriptions
    inbox: mpsc::Receiver<PubSubMessage>,
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl CommandHandler {
    /// Creates a handler for a new client of `db`.
    pub fn new(db: Arc<Database>) -> Self {
        let (outbox, inbox) = mpsc::channel(db.config().pubsub_buffer);
        let client_id = db.allocate_client_id();
        debug!(client_id, "Client created");
        Self {
            db,
            client_id,
            outbox,
            inbox,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub(crate) fn outbox(&self) -> &mpsc::Sender<PubSubMessage> {
        &self.outbox
    }

    /// True while the client holds at least one channel or pattern.
    pub fn is_subscribed(&self) -> bool {
        self.db.pubsub().subscription_count(self.client_id) > 0
    }

    /// Executes one command.
    ///
    /// `argv[0]` is the command name, matched case-insensitively. The
    /// command's effects are atomic with respect to every other client.
    pub fn execute(&self, argv: Vec<Bytes>) -> CommandResult<Reply> {
        let result = self.dispatch(&argv);
        if let Err(e) = &result {
            debug!(
                client_id = self.client_id,
                command = %argv.first().map(|n| String::from_utf8_lossy(n)).unwrap_or_default(),
                error = %e,
                "Command failed"
            );
        }
        result
    }

    /// Executes commands in order, each atomic on its own.
    ///
    /// A failing command does not stop the ones after it.
    pub fn execute_batch(&self, commands: Vec<Vec<Bytes>>) -> Vec<CommandResult<Reply>> {
        commands.into_iter().map(|argv| self.execute(argv)).collect()
    }

    /// Executes commands as one atomic unit.
    ///
    /// Every command is resolved and arity-checked before any runs, and a
    /// batch that fails validation changes nothing. The shards of every key
    /// the batch names stay locked until it finishes; a keyspace-wide
    /// command locks them all. The first failing command rolls back every
    /// earlier change and its error is returned.
    ///
    /// Commands a script may not call are refused here too.
    pub fn execute_atomic(&self, commands: Vec<Vec<Bytes>>) -> CommandResult<Vec<Reply>> {
        let subscribed = self.is_subscribed();
        let mut resolved: Vec<(&'static CommandSpec, CommandFn, &[Bytes])> = Vec::with_capacity(commands.len());
        for argv in &commands {
            let (spec, args) = self.resolve(argv, subscribed)?;
            let exec = match spec.exec {
                Exec::Keyspace(exec) if !spec.has(NOSCRIPT) => exec,
                _ => {
                    return Err(CommandError::other(format!(
                        "{} is not allowed in an atomic batch",
                        spec.name.to_lowercase()
                    )))
                }
            };
            resolved.push((spec, exec, args));
        }

        let storage = self.db.storage();
        let mut keyspace = if resolved.iter().any(|(spec, _, _)| spec.has(ALL_KEYS)) {
            storage.lock_all()
        } else {
            storage.lock(resolved.iter().flat_map(|(spec, _, args)| spec.key_args(args)))
        };

        keyspace.begin_journal();
        let mut replies = Vec::with_capacity(resolved.len());
        for (_, exec, args) in resolved {
            self.db.record_command();
            let mut ctx = ExecContext::new(&self.db, &mut keyspace);
            match exec(&mut ctx, args) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    let restored = keyspace.rollback_journal();
                    debug!(client_id = self.client_id, error = %e, restored, "Atomic batch aborted, changes rolled back");
                    return Err(e);
                }
            }
        }
        keyspace.commit_journal();
        Ok(replies)
    }

    /// Looks up `argv[0]` and checks it may run now.
    fn resolve<'a>(&self, argv: &'a [Bytes], subscribed: bool) -> CommandResult<(&'static CommandSpec, &'a [Bytes])> {
        let Some((name, args)) = argv.split_first() else {
            return Err(CommandError::other("empty command"));
        };
        let spec = table::lookup(name)
            .ok_or_else(|| CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned()))?;
        spec.check_arity(argv.len())?;
        if subscribed && !spec.has(PUBSUB_CONTEXT) {
            return Err(CommandError::SubscribedContext(spec.name.to_lowercase()));
        }
        Ok((spec, args))
    }

    fn dispatch(&self, argv: &[Bytes]) -> CommandResult<Reply> {
        let subscribed = self.is_subscribed();
        let (spec, args) = self.resolve(argv, subscribed)?;
        self.db.record_command();

        if subscribed && spec.name == "PING" {
            let msg = args.first().cloned().unwrap_or_default();
            return Ok(Reply::array(vec![Reply::bulk("pong"), Reply::Bulk(msg)]));
        }

        match spec.exec {
            Exec::Client(f) => f(self, args),
            Exec::Keyspace(f) => {
                let storage = self.db.storage();
                let mut keyspace = if spec.has(ALL_KEYS) {
                    storage.lock_all()
                } else {
                    storage.lock(spec.key_args(args))
                };
                let mut ctx = ExecContext::new(&self.db, &mut keyspace);
                f(&mut ctx, args)
            }
        }
    }

    /// Waits for the next pub/sub message. Never resolves to `None` while
    /// the handler is alive, since it holds a sender itself.
    pub async fn next_message(&mut self) -> Option<PubSubMessage> {
        self.inbox.recv().await
    }

    /// A queued pub/sub message, if one is ready.
    pub fn try_next_message(&mut self) -> Option<PubSubMessage> {
        self.inbox.try_recv().ok()
    }
}

impl Drop for CommandHandler {
    fn drop(&mut self) {
        self.db.pubsub().disconnect(self.client_id);
    }
}
