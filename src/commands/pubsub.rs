//! Publish/subscribe commands.
//!
//! PUBLISH and PUBSUB run like any other command. The (P)SUBSCRIBE family
//! is bound to the calling client, whose queue receives the messages.

use super::args;
use super::{CommandHandler, ExecContext};
use crate::error::{CommandError, CommandResult};
use crate::pubsub::SubscriptionChange;
use crate::reply::Reply;
use crate::storage::GlobPattern;
use bytes::Bytes;

/// One `[kind, channel, count]` triple per change.
fn confirmations(kind: &'static str, changes: Vec<SubscriptionChange>) -> Reply {
    Reply::array(
        changes
            .into_iter()
            .map(|(channel, count)| {
                Reply::array(vec![Reply::bulk(kind), Reply::bulk_or_null(channel), Reply::count(count)])
            })
            .collect(),
    )
}

/// PUBLISH channel message
pub fn cmd_publish(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    Ok(Reply::count(ctx.db.pubsub().publish(&args[0], &args[1])))
}

/// PUBSUB CHANNELS [pattern] | NUMSUB [channel ...] | NUMPAT
pub fn cmd_pubsub(ctx: &mut ExecContext<'_, '_>, args: &[Bytes]) -> CommandResult<Reply> {
    let broker = ctx.db.pubsub();
    match args::upper(&args[0]).as_str() {
        "CHANNELS" => {
            let pattern = match &args[1..] {
                [] => None,
                [p] => Some(GlobPattern::new(p)),
                _ => return Err(CommandError::arity("pubsub|channels")),
            };
            Ok(Reply::bulks(broker.channels(pattern.as_ref())))
        }
        "NUMSUB" => {
            let items = broker
                .numsub(&args[1..])
                .into_iter()
                .flat_map(|(channel, n)| [Reply::Bulk(channel), Reply::count(n)])
                .collect();
            Ok(Reply::array(items))
        }
        "NUMPAT" if args.len() == 1 => Ok(Reply::count(broker.numpat())),
        "NUMPAT" => Err(CommandError::arity("pubsub|numpat")),
        _ => Err(CommandError::UnknownSubcommand(String::from_utf8_lossy(&args[0]).into_owned())),
    }
}

/// SUBSCRIBE channel [channel ...]
pub fn cmd_subscribe(handler: &CommandHandler, args: &[Bytes]) -> CommandResult<Reply> {
    let changes = handler
        .db()
        .pubsub()
        .subscribe(handler.client_id(), handler.outbox(), args);
    Ok(confirmations("subscribe", changes))
}

/// UNSUBSCRIBE [channel ...]
pub fn cmd_unsubscribe(handler: &CommandHandler, args: &[Bytes]) -> CommandResult<Reply> {
    let changes = handler.db().pubsub().unsubscribe(handler.client_id(), args);
    Ok(confirmations("unsubscribe", changes))
}

/// PSUBSCRIBE pattern [pattern ...]
pub fn cmd_psubscribe(handler: &CommandHandler, args: &[Bytes]) -> CommandResult<Reply> {
    let changes = handler
        .db()
        .pubsub()
        .psubscribe(handler.client_id(), handler.outbox(), args);
    Ok(confirmations("psubscribe", changes))
}

/// PUNSUBSCRIBE [pattern ...]
pub fn cmd_punsubscribe(handler: &CommandHandler, args: &[Bytes]) -> CommandResult<Reply> {
    let changes = handler.db().pubsub().punsubscribe(handler.client_id(), args);
    Ok(confirmations("punsubscribe", changes))
}
