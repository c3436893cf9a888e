//! The per-connection match server.

use std::sync::Arc;

use quern_match::{Enquire, LocalShard, MatchError, Shard, SubMatch};
use quern_query::serialise::{pack_bool, pack_string, pack_uint, unpack_string, unpack_uint};
use quern_weight::Stats;
use tracing::{debug, warn};

use crate::channel::ByteChannel;
use crate::wire::{
    Connection, MessageTag, QueryMessage, WireErrorKind, decode_match_window, decode_query,
    decode_stats, encode_mset, encode_stats,
};
use crate::RemoteError;

/// State the server carries between messages of one match.
struct PendingMatch {
    /// The decoded query message.
    message: QueryMessage,
    /// Global statistics, once the client collates them.
    global_stats: Option<Stats>,
}

/// Serves one connection until the client closes it.
///
/// The conversation per match: `Q` in, `L` out, `G` in, `M` in, `O` out.
/// Point queries (`T`, `D`, `F`, `t`) and keep-alives can arrive at any
/// time. Match failures travel back as `E` frames; transport failures
/// are logged and end the connection without any attempt to report them
/// over the broken channel.
pub fn serve(db: Arc<dyn quern_match::Database>, channel: Box<dyn ByteChannel>) {
    let mut conn = Connection::new(channel);
    if let Err(err) = conn.send_handshake(db.doccount(), db.avlength()) {
        warn!(error = %err, "handshake failed");
        return;
    }
    debug!(doccount = db.doccount(), "serving connection");

    let mut pending: Option<PendingMatch> = None;
    loop {
        let (tag, payload) = match conn.receive() {
            Ok(frame) => frame,
            Err(RemoteError::Network(message)) => {
                debug!(%message, "connection ended");
                return;
            }
            Err(err) => {
                warn!(error = %err, "dropping connection");
                return;
            }
        };
        let outcome = match tag {
            MessageTag::Close => {
                debug!("client closed the connection");
                return;
            }
            MessageTag::KeepAlive => conn.send(MessageTag::KeepAlive, &[]),
            MessageTag::Query => match handle_query(&db, &payload) {
                Ok((local_stats, message)) => {
                    pending = Some(PendingMatch {
                        message,
                        global_stats: None,
                    });
                    conn.send(MessageTag::LocalStats, &encode_stats(&local_stats))
                }
                Err(err) => send_match_error(&mut conn, &err),
            },
            MessageTag::GlobalStats => match decode_stats(&payload) {
                Ok(stats) => {
                    match pending.as_mut() {
                        Some(pending) => pending.global_stats = Some(stats),
                        None => warn!("global statistics arrived with no query pending"),
                    }
                    Ok(())
                }
                Err(err) => {
                    warn!(error = %err, "bad global statistics");
                    return;
                }
            },
            MessageTag::RunMatch => match decode_match_window(&payload) {
                Ok((first, maxitems)) => match pending.take() {
                    Some(run) => match run_pending_match(&db, run, first, maxitems) {
                        Ok(encoded) => conn.send(MessageTag::MSet, &encoded),
                        Err(err) => send_match_error(&mut conn, &err),
                    },
                    None => send_match_error(
                        &mut conn,
                        &MatchError::InvalidOperation(
                            "match requested before any query arrived".to_string(),
                        ),
                    ),
                },
                Err(err) => {
                    warn!(error = %err, "bad match window");
                    return;
                }
            },
            MessageTag::TermList => match handle_termlist(&db, &payload) {
                Ok(response) => conn.send(MessageTag::TermList, &response),
                Err(err) => send_match_error(&mut conn, &err),
            },
            MessageTag::Document => match handle_document(&db, &payload) {
                Ok(response) => conn.send(MessageTag::Document, &response),
                Err(err) => send_match_error(&mut conn, &err),
            },
            MessageTag::TermFreq => match handle_termfreq(&db, &payload) {
                Ok(response) => conn.send(MessageTag::TermFreq, &response),
                Err(err) => send_match_error(&mut conn, &err),
            },
            MessageTag::TermExists => match handle_term_exists(&db, &payload) {
                Ok(response) => conn.send(MessageTag::TermExists, &response),
                Err(err) => send_match_error(&mut conn, &err),
            },
            MessageTag::LocalStats | MessageTag::MSet | MessageTag::Error => {
                warn!(?tag, "client sent a server-to-client frame");
                return;
            }
        };
        if let Err(err) = outcome {
            // Don't try to report a transport failure over the transport
            // that just failed.
            warn!(error = %err, "dropping connection");
            return;
        }
    }
}

/// Sends a match failure back as an `E` frame.
fn send_match_error(conn: &mut Connection, err: &MatchError) -> Result<(), RemoteError> {
    debug!(error = %err, "reporting match error to client");
    let mut payload = Vec::new();
    payload.push(WireErrorKind::classify(err).as_byte());
    pack_string(&mut payload, &err.to_string());
    conn.send(MessageTag::Error, &payload)
}

/// Decodes a `Q` frame and computes this shard's local statistics.
fn handle_query(
    db: &Arc<dyn quern_match::Database>,
    payload: &[u8],
) -> Result<(Stats, QueryMessage), MatchError> {
    let message = decode_query(payload).map_err(MatchError::from)?;
    message.query.validate()?;

    let shard = LocalShard::new(Arc::clone(db));
    let sources = quern_match::SourceRegistry::new();
    let spec = quern_match::MatchSpec {
        query: &message.query,
        qlen: message.query.qlen(),
        rset: message.rset.clone(),
        weight: message.weight.as_ref(),
        options: &message.options,
        sources: &sources,
    };
    let mut sub = shard.submatch(spec)?;
    let mut local_stats = Stats::new();
    sub.prepare_match(false, &mut local_stats)?;
    Ok((local_stats, message))
}

/// Evaluates a pending match and encodes its result set.
fn run_pending_match(
    db: &Arc<dyn quern_match::Database>,
    run: PendingMatch,
    first: u32,
    maxitems: u32,
) -> Result<Vec<u8>, MatchError> {
    let PendingMatch {
        message,
        global_stats,
    } = run;
    let mut enquire = Enquire::new(Arc::clone(db));
    enquire.set_query(message.query);
    enquire.set_rset(message.rset);
    enquire.set_weight(message.weight);
    enquire.set_options(message.options);
    if let Some(stats) = global_stats {
        enquire.set_collated_stats(Arc::new(stats));
    }
    let mset = enquire.mset(first, maxitems, None)?;
    Ok(encode_mset(&mset))
}

/// Answers a `T` point query.
fn handle_termlist(
    db: &Arc<dyn quern_match::Database>,
    payload: &[u8],
) -> Result<Vec<u8>, MatchError> {
    let input = &mut &payload[..];
    let did = unpack_uint(input).map_err(|err| MatchError::Serialisation(err.to_string()))? as u32;
    let entries = db.open_term_list(did)?;
    let mut response = Vec::new();
    pack_uint(&mut response, entries.len() as u64);
    for entry in entries {
        pack_string(&mut response, &entry.term);
        pack_uint(&mut response, u64::from(entry.wdf));
    }
    Ok(response)
}

/// Answers a `D` point query.
fn handle_document(
    db: &Arc<dyn quern_match::Database>,
    payload: &[u8],
) -> Result<Vec<u8>, MatchError> {
    let input = &mut &payload[..];
    let did = unpack_uint(input).map_err(|err| MatchError::Serialisation(err.to_string()))? as u32;
    let doc = db.open_document(did, false)?;
    let mut response = Vec::new();
    pack_string(&mut response, &doc.data);
    let values: Vec<(u32, &str)> = doc.values().collect();
    pack_uint(&mut response, values.len() as u64);
    for (slot, value) in values {
        pack_uint(&mut response, u64::from(slot));
        pack_string(&mut response, value);
    }
    Ok(response)
}

/// Answers an `F` point query.
fn handle_termfreq(
    db: &Arc<dyn quern_match::Database>,
    payload: &[u8],
) -> Result<Vec<u8>, MatchError> {
    let input = &mut &payload[..];
    let term = unpack_string(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
    let mut response = Vec::new();
    pack_uint(&mut response, u64::from(db.termfreq(&term)));
    pack_uint(&mut response, db.collection_freq(&term));
    Ok(response)
}

/// Answers a `t` point query.
fn handle_term_exists(
    db: &Arc<dyn quern_match::Database>,
    payload: &[u8],
) -> Result<Vec<u8>, MatchError> {
    let input = &mut &payload[..];
    let term = unpack_string(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
    let mut response = Vec::new();
    pack_bool(&mut response, db.term_exists(&term));
    Ok(response)
}
