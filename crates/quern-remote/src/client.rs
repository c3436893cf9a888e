//! The remote shard client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use quern_match::{
    Advanced, AllTermsEntry, Database, DocStats, Document, LeafPostList, MSet, MatchError,
    MatchSpec, PositionList, PostList, RecalcHint, Shard, SubMatch, TermInfoMap, TermListEntry,
};
use quern_query::serialise::{pack_string, pack_uint, unpack_bool, unpack_string, unpack_uint};
use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs, ValueSlot};

use crate::channel::ByteChannel;
use crate::wire::{
    Connection, MessageTag, encode_match_window, encode_query, encode_stats, decode_mset,
    decode_stats,
};
use crate::RemoteError;

/// How long the statistics phase waits when probing for remote input
/// without blocking.
const PREPARE_PROBE: Duration = Duration::from_millis(1);

/// Locks a shared connection, riding through poisoning.
///
/// Poisoning can only happen if another match panicked; continuing with
/// the connection state is no worse than reconnecting.
fn lock_conn(conn: &Arc<Mutex<Connection>>) -> std::sync::MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A shard evaluated by a match server at the other end of a channel.
///
/// The connection handshakes eagerly, so construction fails fast on
/// protocol mismatches. One connection serves one match at a time plus
/// point queries for document access.
pub struct RemoteShard {
    /// The shared connection.
    conn: Arc<Mutex<Connection>>,
    /// Document count reported in the handshake.
    doccount: DocCount,
    /// Average document length reported in the handshake.
    avlength: f64,
}

impl RemoteShard {
    /// Connects over `channel` and performs the handshake.
    pub fn connect(channel: Box<dyn ByteChannel>) -> Result<Self, RemoteError> {
        let mut conn = Connection::new(channel);
        let (doccount, avlength) = conn.read_handshake()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            doccount,
            avlength,
        })
    }

    /// Sets the per-operation timeout for reads from the server.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), RemoteError> {
        self.lock().set_read_timeout(timeout)
    }

    /// Probes the server so an idle connection stays open.
    pub fn keep_alive(&self) -> Result<(), RemoteError> {
        let mut conn = self.lock();
        conn.send(MessageTag::KeepAlive, &[])?;
        conn.expect(MessageTag::KeepAlive)?;
        Ok(())
    }

    /// Asks the server to shut the connection down cleanly.
    pub fn close(&self) -> Result<(), RemoteError> {
        self.lock().send(MessageTag::Close, &[])
    }

    /// Locks the shared connection.
    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        lock_conn(&self.conn)
    }
}

impl Shard for RemoteShard {
    fn database(&self) -> Arc<dyn Database> {
        Arc::new(RemoteDatabase {
            conn: Arc::clone(&self.conn),
            doccount: self.doccount,
            avlength: self.avlength,
        })
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn submatch(&self, spec: MatchSpec<'_>) -> Result<Box<dyn SubMatch>, MatchError> {
        if spec.options.decider.is_some() || !spec.options.spies.is_empty() {
            return Err(MatchError::unimplemented(
                "match deciders and spies are not supported against a remote shard",
            ));
        }
        if spec.options.key_maker.is_some() {
            return Err(MatchError::unimplemented(
                "key makers are not supported against a remote shard",
            ));
        }
        if !spec.sources.is_empty() {
            return Err(MatchError::unimplemented(
                "posting sources are not supported against a remote shard",
            ));
        }
        let payload = encode_query(spec.query, spec.weight, &spec.rset, spec.options);
        Ok(Box::new(RemoteSubMatch {
            conn: Arc::clone(&self.conn),
            query_payload: payload,
            query_sent: false,
            mset: None,
        }))
    }
}

/// A remote shard's per-match façade.
///
/// Drives the conversation: `Q` out, `L` in during preparation; `G` and
/// `M` out at match start; `O` in when the evaluated MSet is needed.
pub struct RemoteSubMatch {
    /// The shared connection.
    conn: Arc<Mutex<Connection>>,
    /// The encoded `Q` payload.
    query_payload: Vec<u8>,
    /// Whether `Q` has been sent.
    query_sent: bool,
    /// The evaluated result set, once fetched.
    mset: Option<MSet>,
}

impl RemoteSubMatch {
    /// Reads the `O` frame if it hasn't arrived yet.
    fn fetch_mset(&mut self) -> Result<(), MatchError> {
        if self.mset.is_none() {
            let payload = lock_conn(&self.conn)
                .expect(MessageTag::MSet)
                .map_err(MatchError::from)?;
            self.mset = Some(decode_mset(&payload)?);
        }
        Ok(())
    }
}

impl SubMatch for RemoteSubMatch {
    fn prepare_match(&mut self, nowait: bool, stats: &mut Stats) -> Result<bool, MatchError> {
        let conn = Arc::clone(&self.conn);
        let mut conn = lock_conn(&conn);
        if !self.query_sent {
            conn.send(MessageTag::Query, &self.query_payload)
                .map_err(MatchError::from)?;
            self.query_sent = true;
        }
        if nowait && !conn.input_ready(PREPARE_PROBE).map_err(MatchError::from)? {
            // Nothing from the server yet; the orchestrator will come
            // back to us after the local shards.
            return Ok(false);
        }
        let payload = conn.expect(MessageTag::LocalStats).map_err(MatchError::from)?;
        drop(conn);
        let local = decode_stats(&payload)?;
        stats.add_stats(&local);
        Ok(true)
    }

    fn start_match(
        &mut self,
        first: DocCount,
        maxitems: DocCount,
        _check_at_least: DocCount,
        stats: &Arc<Stats>,
    ) -> Result<(), MatchError> {
        let mut conn = lock_conn(&self.conn);
        conn.send(MessageTag::GlobalStats, &encode_stats(stats))
            .map_err(MatchError::from)?;
        conn.send(MessageTag::RunMatch, &encode_match_window(first, maxitems))
            .map_err(MatchError::from)?;
        Ok(())
    }

    fn get_postlist(
        &mut self,
        term_info: Option<&mut TermInfoMap>,
        _recalc: &RecalcHint,
    ) -> Result<Box<dyn PostList>, MatchError> {
        self.fetch_mset()?;
        let mset = self.mset.as_ref().expect("mset was just fetched");
        if let Some(term_info) = term_info {
            *term_info = mset.termfreqandwts.clone();
        }
        Ok(Box::new(MSetPostList::new(mset)))
    }

    fn remote_mset(&mut self) -> Result<MSet, MatchError> {
        self.fetch_mset()?;
        Ok(self.mset.take().expect("mset was just fetched"))
    }

    fn percent_factor(&self) -> Option<f64> {
        self.mset
            .as_ref()
            .map(|mset| mset.percent_factor)
            .filter(|factor| *factor > 0.0)
    }
}

/// Replays a served MSet through the postlist interface.
///
/// Weights were computed remotely, so iteration order only has to honour
/// the ascending-docid contract, not the remote ranking.
struct MSetPostList {
    /// `(docid, weight)` pairs sorted by docid.
    postings: Vec<(DocId, f64)>,
    /// Cursor, `usize::MAX` before the first advance.
    cursor: usize,
    /// Bounds reported by the server.
    lower_bound: DocCount,
    estimate: DocCount,
    upper_bound: DocCount,
}

impl MSetPostList {
    /// Builds the replay postlist from a served MSet.
    fn new(mset: &MSet) -> Self {
        let mut postings: Vec<(DocId, f64)> = mset
            .items
            .iter()
            .map(|item| (item.did, item.weight))
            .collect();
        postings.sort_by_key(|(did, _)| *did);
        Self {
            postings,
            cursor: usize::MAX,
            lower_bound: mset.matches_lower_bound,
            estimate: mset.matches_estimated,
            upper_bound: mset.matches_upper_bound,
        }
    }

    /// Whether the cursor has been advanced at least once.
    fn started(&self) -> bool {
        self.cursor != usize::MAX
    }
}

impl PostList for MSetPostList {
    fn termfreq_min(&self) -> DocCount {
        self.lower_bound
    }

    fn termfreq_max(&self) -> DocCount {
        self.upper_bound
    }

    fn termfreq_est(&self) -> DocCount {
        self.estimate
    }

    fn termfreqs_est(&self, _stats: &Stats) -> TermFreqs {
        TermFreqs::new(self.estimate, 0, 0)
    }

    fn maxweight(&self) -> f64 {
        // Bounds the current and later postings; earlier ones are gone.
        let from = if self.started() {
            self.cursor.min(self.postings.len())
        } else {
            0
        };
        self.postings[from..]
            .iter()
            .map(|(_, weight)| *weight)
            .fold(0.0, f64::max)
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.maxweight()
    }

    fn docid(&self) -> DocId {
        self.postings[self.cursor].0
    }

    fn weight(&self, _doc: &DocStats) -> f64 {
        self.postings[self.cursor].1
    }

    fn wdf(&self) -> TermCount {
        0
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        self.cursor = self.cursor.wrapping_add(1);
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        if !self.started() {
            self.cursor = 0;
        }
        while self.cursor < self.postings.len() && self.postings[self.cursor].0 < did {
            self.cursor += 1;
        }
        Ok(None)
    }

    fn at_end(&self) -> bool {
        self.started() && self.cursor >= self.postings.len()
    }

    fn wants_doc_stats(&self) -> bool {
        // The weights are already final; never pay for a doclength fetch.
        false
    }
}

/// Point-query access to a remote shard's documents and terms.
///
/// Backs collapse keys, sort keys and percent scaling when a remote
/// shard's document wins. Posting-level access stays on the server, so
/// `open_post_list` and friends are unimplemented.
pub struct RemoteDatabase {
    /// The shared connection.
    conn: Arc<Mutex<Connection>>,
    /// Document count from the handshake.
    doccount: DocCount,
    /// Average length from the handshake.
    avlength: f64,
}

impl RemoteDatabase {
    /// Runs one request/response exchange.
    fn round_trip(&self, tag: MessageTag, payload: &[u8]) -> Result<Vec<u8>, MatchError> {
        let mut conn = lock_conn(&self.conn);
        conn.send(tag, payload).map_err(MatchError::from)?;
        conn.expect(tag).map_err(MatchError::from)
    }

    /// The standard "not reachable over the wire" error.
    fn no_postings<T>(&self) -> Result<T, MatchError> {
        Err(MatchError::unimplemented(
            "posting-level access to a remote shard stays on the server",
        ))
    }
}

impl Database for RemoteDatabase {
    fn doccount(&self) -> DocCount {
        self.doccount
    }

    fn lastdocid(&self) -> DocId {
        self.doccount
    }

    fn avlength(&self) -> f64 {
        self.avlength
    }

    fn total_length(&self) -> u64 {
        0
    }

    fn doclength(&self, _did: DocId) -> Result<TermCount, MatchError> {
        self.no_postings()
    }

    fn unique_terms(&self, _did: DocId) -> Result<TermCount, MatchError> {
        self.no_postings()
    }

    fn doclength_lower_bound(&self) -> TermCount {
        0
    }

    fn doclength_upper_bound(&self) -> TermCount {
        0
    }

    fn wdf_upper_bound(&self, _term: &str) -> TermCount {
        0
    }

    fn has_positions(&self) -> bool {
        false
    }

    fn term_exists(&self, term: &str) -> bool {
        let mut payload = Vec::new();
        pack_string(&mut payload, term);
        self.round_trip(MessageTag::TermExists, &payload)
            .ok()
            .and_then(|response| unpack_bool(&mut response.as_slice()).ok())
            .unwrap_or(false)
    }

    fn termfreq(&self, term: &str) -> DocCount {
        let mut payload = Vec::new();
        pack_string(&mut payload, term);
        self.round_trip(MessageTag::TermFreq, &payload)
            .ok()
            .and_then(|response| {
                let input = &mut response.as_slice();
                unpack_uint(input).ok()
            })
            .unwrap_or(0) as DocCount
    }

    fn collection_freq(&self, term: &str) -> u64 {
        let mut payload = Vec::new();
        pack_string(&mut payload, term);
        self.round_trip(MessageTag::TermFreq, &payload)
            .ok()
            .and_then(|response| {
                let input = &mut response.as_slice();
                unpack_uint(input).ok()?;
                unpack_uint(input).ok()
            })
            .unwrap_or(0)
    }

    fn open_post_list(&self, _term: &str) -> Result<Box<dyn LeafPostList>, MatchError> {
        self.no_postings()
    }

    fn open_term_list(&self, did: DocId) -> Result<Vec<TermListEntry>, MatchError> {
        let mut payload = Vec::new();
        pack_uint(&mut payload, u64::from(did));
        let response = self.round_trip(MessageTag::TermList, &payload)?;
        let input = &mut response.as_slice();
        let count = unpack_uint(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let term =
                unpack_string(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
            let wdf = unpack_uint(input)
                .map_err(|err| MatchError::Serialisation(err.to_string()))?
                as TermCount;
            entries.push(TermListEntry { term, wdf });
        }
        Ok(entries)
    }

    fn open_allterms(&self, _prefix: &str) -> Result<Vec<AllTermsEntry>, MatchError> {
        self.no_postings()
    }

    fn open_position_list(&self, _did: DocId, _term: &str) -> Result<PositionList, MatchError> {
        self.no_postings()
    }

    fn open_document(&self, did: DocId, _lazy: bool) -> Result<Document, MatchError> {
        let mut payload = Vec::new();
        pack_uint(&mut payload, u64::from(did));
        let response = self.round_trip(MessageTag::Document, &payload)?;
        let input = &mut response.as_slice();
        let data =
            unpack_string(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
        let count = unpack_uint(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let slot = unpack_uint(input)
                .map_err(|err| MatchError::Serialisation(err.to_string()))?
                as ValueSlot;
            let value =
                unpack_string(input).map_err(|err| MatchError::Serialisation(err.to_string()))?;
            values.push((slot, value));
        }
        Ok(Document::new(did, data, values))
    }

    fn value_lower_bound(&self, _slot: ValueSlot) -> String {
        String::new()
    }

    fn value_upper_bound(&self, _slot: ValueSlot) -> String {
        String::new()
    }

    fn value_freq(&self, _slot: ValueSlot) -> DocCount {
        0
    }

    fn open_value_list(
        &self,
        _slot: ValueSlot,
    ) -> Result<Box<dyn quern_match::ValueList>, MatchError> {
        self.no_postings()
    }
}
