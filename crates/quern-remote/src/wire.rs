//! Framing and codecs for the remote protocol.
//!
//! After a textual handshake line (`OM <version> <doccount> <avlength>`,
//! server to client), the connection carries tagged frames: one tag byte,
//! a variable-length payload size, then the payload. Payloads reuse the
//! portable primitives from [`quern_query::serialise`].

use std::io::{Read, Write};
use std::time::Duration;

use quern_match::{DocidOrder, MSet, MSetItem, MatchOptions, RSet, SortBy, TermFreqAndWeight};
use quern_query::serialise::{
    pack_bool, pack_double, pack_string, pack_uint, unpack_bool, unpack_byte, unpack_double,
    unpack_string, unpack_uint,
};
use quern_query::Query;
use quern_weight::{Stats, TermStats, ValueStats, Weight, unserialise_weight};

use crate::channel::ByteChannel;
use crate::RemoteError;

/// Protocol revision; both ends must agree exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic token opening the handshake line.
pub const PROTOCOL_MAGIC: &str = "OM";

/// Upper bound on a sane frame payload.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// Query, options, weights and RSet (client to server).
    Query,
    /// The server's shard-local statistics.
    LocalStats,
    /// The collated global statistics (client to server).
    GlobalStats,
    /// The match window `(first, maxitems)` (client to server).
    RunMatch,
    /// The evaluated match set (server to client).
    MSet,
    /// Term list point query.
    TermList,
    /// Document point query.
    Document,
    /// Term frequency point query.
    TermFreq,
    /// Term existence point query.
    TermExists,
    /// Keep-alive probe (either direction).
    KeepAlive,
    /// Error report (server to client).
    Error,
    /// Orderly shutdown (client to server).
    Close,
}

impl MessageTag {
    /// The tag's wire byte.
    fn as_byte(self) -> u8 {
        match self {
            Self::Query => b'Q',
            Self::LocalStats => b'L',
            Self::GlobalStats => b'G',
            Self::RunMatch => b'M',
            Self::MSet => b'O',
            Self::TermList => b'T',
            Self::Document => b'D',
            Self::TermFreq => b'F',
            Self::TermExists => b't',
            Self::KeepAlive => b'K',
            Self::Error => b'E',
            Self::Close => b'X',
        }
    }

    /// Decodes a wire byte.
    fn from_byte(byte: u8) -> Result<Self, RemoteError> {
        Ok(match byte {
            b'Q' => Self::Query,
            b'L' => Self::LocalStats,
            b'G' => Self::GlobalStats,
            b'M' => Self::RunMatch,
            b'O' => Self::MSet,
            b'T' => Self::TermList,
            b'D' => Self::Document,
            b'F' => Self::TermFreq,
            b't' => Self::TermExists,
            b'K' => Self::KeepAlive,
            b'E' => Self::Error,
            b'X' => Self::Close,
            other => {
                return Err(RemoteError::corrupt(format!(
                    "unknown message tag {other:#04x}"
                )));
            }
        })
    }
}

/// Error kind bytes carried in `E` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorKind {
    /// Maps to `MatchError::InvalidArgument`.
    InvalidArgument,
    /// Maps to `MatchError::Unimplemented`.
    Unimplemented,
    /// Maps to `MatchError::Wildcard`.
    Wildcard,
    /// Maps to `MatchError::DocNotFound` (docid lost in transit).
    DocNotFound,
    /// Anything else.
    Other,
}

impl WireErrorKind {
    /// Classifies a match error for the wire.
    pub fn classify(err: &quern_match::MatchError) -> Self {
        use quern_match::MatchError;
        match err {
            MatchError::InvalidArgument(_) | MatchError::Query(_) => Self::InvalidArgument,
            MatchError::Unimplemented(_) => Self::Unimplemented,
            MatchError::Wildcard(_) => Self::Wildcard,
            MatchError::DocNotFound(_) => Self::DocNotFound,
            _ => Self::Other,
        }
    }

    /// The kind's wire byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::InvalidArgument => b'a',
            Self::Unimplemented => b'u',
            Self::Wildcard => b'w',
            Self::DocNotFound => b'd',
            Self::Other => b'o',
        }
    }

    /// Rebuilds a client-side error from the wire kind and message.
    pub fn into_error(byte: u8, message: String) -> quern_match::MatchError {
        use quern_match::MatchError;
        match byte {
            b'a' => MatchError::InvalidArgument(message),
            b'u' => MatchError::Unimplemented(message),
            b'w' => MatchError::Wildcard(message),
            // The docid didn't travel; report the failure as a remote one.
            _ => MatchError::Network(format!("remote error: {message}")),
        }
    }
}

/// A framed connection over a byte channel.
///
/// Owns a one-byte pushback slot so the cooperative statistics phase can
/// probe for input without committing to a blocking frame read.
pub struct Connection {
    /// The underlying channel.
    channel: Box<dyn ByteChannel>,
    /// A byte read ahead of its frame.
    pushback: Option<u8>,
    /// The configured blocking-read timeout, restored after probes.
    timeout: Option<Duration>,
}

impl Connection {
    /// Wraps a channel.
    pub fn new(channel: Box<dyn ByteChannel>) -> Self {
        Self {
            channel,
            pushback: None,
            timeout: None,
        }
    }

    /// Sets the channel's blocking-read timeout.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), RemoteError> {
        self.timeout = timeout;
        self.channel
            .set_read_timeout(timeout)
            .map_err(|err| RemoteError::network(err.to_string()))
    }

    /// Sends the handshake line.
    pub fn send_handshake(&mut self, doccount: u32, avlength: f64) -> Result<(), RemoteError> {
        let line = format!("{PROTOCOL_MAGIC} {PROTOCOL_VERSION} {doccount} {avlength}\n");
        self.send_raw(line.as_bytes())
    }

    /// Reads and checks the handshake line, returning the shard's
    /// document count and average length.
    pub fn read_handshake(&mut self) -> Result<(u32, f64), RemoteError> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == b'\n' {
                break;
            }
            if line.len() > 256 {
                return Err(RemoteError::network("handshake line too long"));
            }
            line.push(byte);
        }
        let line = String::from_utf8(line)
            .map_err(|_| RemoteError::network("handshake is not valid UTF-8"))?;
        let mut parts = line.split(' ');
        if parts.next() != Some(PROTOCOL_MAGIC) {
            return Err(RemoteError::network(format!("bad handshake: {line:?}")));
        }
        let version: u32 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RemoteError::network("handshake missing protocol version"))?;
        if version != PROTOCOL_VERSION {
            return Err(RemoteError::network(format!(
                "protocol version mismatch: peer speaks {version}, we speak {PROTOCOL_VERSION}"
            )));
        }
        let doccount: u32 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RemoteError::network("handshake missing document count"))?;
        let avlength: f64 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RemoteError::network("handshake missing average length"))?;
        Ok((doccount, avlength))
    }

    /// Sends one frame.
    pub fn send(&mut self, tag: MessageTag, payload: &[u8]) -> Result<(), RemoteError> {
        let mut frame = Vec::with_capacity(payload.len() + 6);
        frame.push(tag.as_byte());
        pack_uint(&mut frame, payload.len() as u64);
        frame.extend_from_slice(payload);
        self.send_raw(&frame)
    }

    /// Receives one frame.
    pub fn receive(&mut self) -> Result<(MessageTag, Vec<u8>), RemoteError> {
        let tag = MessageTag::from_byte(self.read_byte()?)?;
        let len = self.read_vint()?;
        if len > MAX_FRAME_LEN {
            return Err(RemoteError::corrupt(format!("frame of {len} bytes refused")));
        }
        let mut payload = vec![0u8; len as usize];
        self.read_exact(&mut payload)?;
        Ok((tag, payload))
    }

    /// Receives a frame, requiring a specific tag.
    ///
    /// An `E` frame is decoded and surfaced as the error it carries.
    pub fn expect(&mut self, want: MessageTag) -> Result<Vec<u8>, RemoteError> {
        let (tag, payload) = self.receive()?;
        if tag == MessageTag::Error {
            let mut input = payload.as_slice();
            let kind = unpack_byte(&mut input).map_err(|err| RemoteError::corrupt(err.to_string()))?;
            let message =
                unpack_string(&mut input).map_err(|err| RemoteError::corrupt(err.to_string()))?;
            return Err(RemoteError::Match(WireErrorKind::into_error(kind, message)));
        }
        if tag != want {
            return Err(RemoteError::corrupt(format!(
                "expected {want:?} frame, got {tag:?}"
            )));
        }
        Ok(payload)
    }

    /// Probes for buffered input without blocking for longer than
    /// `probe_timeout`.
    ///
    /// A byte read here is pushed back for the next frame read.
    pub fn input_ready(&mut self, probe_timeout: Duration) -> Result<bool, RemoteError> {
        if self.pushback.is_some() {
            return Ok(true);
        }
        self.channel
            .set_read_timeout(Some(probe_timeout))
            .map_err(|err| RemoteError::network(err.to_string()))?;
        let mut byte = [0u8; 1];
        let outcome = self.channel.read(&mut byte);
        self.channel
            .set_read_timeout(self.timeout)
            .map_err(|err| RemoteError::network(err.to_string()))?;
        match outcome {
            Ok(0) => Err(RemoteError::network("peer closed the connection")),
            Ok(_) => {
                self.pushback = Some(byte[0]);
                Ok(true)
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(RemoteError::network(err.to_string())),
        }
    }

    /// Reads one byte, honouring the pushback slot.
    fn read_byte(&mut self) -> Result<u8, RemoteError> {
        if let Some(byte) = self.pushback.take() {
            return Ok(byte);
        }
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Reads a variable-length unsigned integer byte by byte.
    fn read_vint(&mut self) -> Result<u64, RemoteError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 {
                return Err(RemoteError::corrupt("frame length overflows"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Fills `buf` from the channel, classifying failures.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RemoteError> {
        let mut filled = 0;
        if let Some(byte) = self.pushback.take() {
            if !buf.is_empty() {
                buf[0] = byte;
                filled = 1;
            }
        }
        while filled < buf.len() {
            match self.channel.read(&mut buf[filled..]) {
                Ok(0) => return Err(RemoteError::network("peer closed mid-message")),
                Ok(count) => filled += count,
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Err(RemoteError::NetworkTimeout(
                        "timed out waiting for remote input".to_string(),
                    ));
                }
                Err(err) => return Err(RemoteError::network(err.to_string())),
            }
        }
        Ok(())
    }

    /// Writes bytes, classifying failures.
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), RemoteError> {
        self.channel
            .write_all(bytes)
            .and_then(|()| self.channel.flush())
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    RemoteError::NetworkTimeout("timed out sending to remote".to_string())
                }
                _ => RemoteError::network(err.to_string()),
            })
    }
}

/// Everything a `Q` frame carries.
pub struct QueryMessage {
    /// The query tree.
    pub query: Query,
    /// The weighting scheme.
    pub weight: Box<dyn Weight>,
    /// The shard's slice of the relevance set, in local docids.
    pub rset: RSet,
    /// The options affecting server-side evaluation.
    pub options: MatchOptions,
}

/// Encodes a `Q` payload.
pub fn encode_query(
    query: &Query,
    weight: &dyn Weight,
    rset: &RSet,
    options: &MatchOptions,
) -> Vec<u8> {
    let mut out = Vec::new();
    let query_bytes = query.serialise();
    pack_uint(&mut out, query_bytes.len() as u64);
    out.extend_from_slice(&query_bytes);

    pack_string(&mut out, weight.name());
    let weight_bytes = weight.serialise();
    pack_uint(&mut out, weight_bytes.len() as u64);
    out.extend_from_slice(&weight_bytes);

    pack_uint(&mut out, u64::from(rset.len()));
    for did in rset.iter() {
        pack_uint(&mut out, u64::from(did));
    }

    // The options which matter server-side; hooks can't travel.
    match options.collapse_key {
        Some(slot) => {
            pack_bool(&mut out, true);
            pack_uint(&mut out, u64::from(slot));
            pack_uint(&mut out, u64::from(options.collapse_max));
        }
        None => pack_bool(&mut out, false),
    }
    pack_uint(&mut out, u64::from(options.percent_cutoff));
    pack_double(&mut out, options.weight_cutoff);
    out.push(match options.docid_order {
        DocidOrder::Asc => 0,
        DocidOrder::Desc => 1,
        DocidOrder::DontCare => 2,
    });
    match options.sort_key {
        Some(slot) => {
            pack_bool(&mut out, true);
            pack_uint(&mut out, u64::from(slot));
        }
        None => pack_bool(&mut out, false),
    }
    out.push(match options.sort_by {
        SortBy::Rel => 0,
        SortBy::Val => 1,
        SortBy::RelVal => 2,
        SortBy::ValRel => 3,
    });
    pack_bool(&mut out, options.sort_value_forward);
    out
}

/// Decodes a `Q` payload.
pub fn decode_query(payload: &[u8]) -> Result<QueryMessage, RemoteError> {
    let corrupt = |err: quern_query::QueryError| RemoteError::corrupt(err.to_string());
    let input = &mut &payload[..];

    let query_len = unpack_uint(input).map_err(corrupt)? as usize;
    if input.len() < query_len {
        return Err(RemoteError::corrupt("truncated query"));
    }
    let (query_bytes, rest) = input.split_at(query_len);
    *input = rest;
    let query = Query::unserialise(query_bytes).map_err(corrupt)?;

    let weight_name = unpack_string(input).map_err(corrupt)?;
    let weight_len = unpack_uint(input).map_err(corrupt)? as usize;
    if input.len() < weight_len {
        return Err(RemoteError::corrupt("truncated weight parameters"));
    }
    let (weight_bytes, rest) = input.split_at(weight_len);
    *input = rest;
    let weight = unserialise_weight(&weight_name, weight_bytes)
        .map_err(|err| RemoteError::corrupt(err.to_string()))?;

    let rset_len = unpack_uint(input).map_err(corrupt)?;
    let mut rset = RSet::new();
    for _ in 0..rset_len {
        rset.add_document(unpack_uint(input).map_err(corrupt)? as u32);
    }

    let mut options = MatchOptions::new();
    if unpack_bool(input).map_err(corrupt)? {
        let slot = unpack_uint(input).map_err(corrupt)? as u32;
        let max = unpack_uint(input).map_err(corrupt)? as u32;
        options = options.collapse(slot, max);
    }
    options.percent_cutoff = unpack_uint(input).map_err(corrupt)? as u32;
    options.weight_cutoff = unpack_double(input).map_err(corrupt)?;
    options.docid_order = match unpack_byte(input).map_err(corrupt)? {
        0 => DocidOrder::Asc,
        1 => DocidOrder::Desc,
        2 => DocidOrder::DontCare,
        other => {
            return Err(RemoteError::corrupt(format!("bad docid order {other}")));
        }
    };
    if unpack_bool(input).map_err(corrupt)? {
        options.sort_key = Some(unpack_uint(input).map_err(corrupt)? as u32);
    }
    options.sort_by = match unpack_byte(input).map_err(corrupt)? {
        0 => SortBy::Rel,
        1 => SortBy::Val,
        2 => SortBy::RelVal,
        3 => SortBy::ValRel,
        other => return Err(RemoteError::corrupt(format!("bad sort setting {other}"))),
    };
    options.sort_value_forward = unpack_bool(input).map_err(corrupt)?;
    Ok(QueryMessage {
        query,
        weight,
        rset,
        options,
    })
}

/// Encodes collection statistics (`L` and `G` payloads).
pub fn encode_stats(stats: &Stats) -> Vec<u8> {
    let mut out = Vec::new();
    pack_uint(&mut out, u64::from(stats.collection_size));
    pack_uint(&mut out, u64::from(stats.rset_size));
    pack_double(&mut out, stats.average_length);
    pack_uint(&mut out, stats.total_length);
    pack_uint(&mut out, stats.total_term_count);
    pack_uint(&mut out, u64::from(stats.doclength_lower_bound));
    pack_uint(&mut out, u64::from(stats.doclength_upper_bound));

    let termstats: Vec<(&str, &TermStats)> = stats.termstats_iter().collect();
    pack_uint(&mut out, termstats.len() as u64);
    for (term, entry) in termstats {
        pack_string(&mut out, term);
        pack_uint(&mut out, u64::from(entry.termfreq));
        pack_uint(&mut out, entry.collfreq);
        pack_uint(&mut out, u64::from(entry.reltermfreq));
        pack_uint(&mut out, u64::from(entry.wdf_upper_bound));
    }

    let value_stats: Vec<(u32, &ValueStats)> = stats.value_stats_iter().collect();
    pack_uint(&mut out, value_stats.len() as u64);
    for (slot, entry) in value_stats {
        pack_uint(&mut out, u64::from(slot));
        pack_string(&mut out, &entry.lower_bound);
        pack_string(&mut out, &entry.upper_bound);
        pack_uint(&mut out, u64::from(entry.freq));
    }
    out
}

/// Decodes collection statistics.
pub fn decode_stats(payload: &[u8]) -> Result<Stats, RemoteError> {
    let corrupt = |err: quern_query::QueryError| RemoteError::corrupt(err.to_string());
    let input = &mut &payload[..];
    let mut stats = Stats::new();
    let collection_size = unpack_uint(input).map_err(corrupt)? as u32;
    let rset_size = unpack_uint(input).map_err(corrupt)? as u32;
    let average_length = unpack_double(input).map_err(corrupt)?;
    let total_length = unpack_uint(input).map_err(corrupt)?;
    let total_term_count = unpack_uint(input).map_err(corrupt)?;
    let doclength_lower = unpack_uint(input).map_err(corrupt)? as u32;
    let doclength_upper = unpack_uint(input).map_err(corrupt)? as u32;
    stats.add_collection(
        collection_size,
        average_length,
        total_length,
        (doclength_lower, doclength_upper),
    );
    stats.add_total_term_count(total_term_count);
    stats.add_rset_size(rset_size);

    let n_terms = unpack_uint(input).map_err(corrupt)?;
    for _ in 0..n_terms {
        let term = unpack_string(input).map_err(corrupt)?;
        let termfreq = unpack_uint(input).map_err(corrupt)? as u32;
        let collfreq = unpack_uint(input).map_err(corrupt)?;
        let reltermfreq = unpack_uint(input).map_err(corrupt)? as u32;
        let wdf_upper = unpack_uint(input).map_err(corrupt)? as u32;
        stats.add_termfreq(&term, termfreq, collfreq, wdf_upper);
        stats.add_reltermfreq(&term, reltermfreq);
    }

    let n_slots = unpack_uint(input).map_err(corrupt)?;
    for _ in 0..n_slots {
        let slot = unpack_uint(input).map_err(corrupt)? as u32;
        let lower_bound = unpack_string(input).map_err(corrupt)?;
        let upper_bound = unpack_string(input).map_err(corrupt)?;
        let freq = unpack_uint(input).map_err(corrupt)? as u32;
        stats.add_value_stats(
            slot,
            &ValueStats {
                lower_bound,
                upper_bound,
                freq,
            },
        );
    }
    Ok(stats)
}

/// Encodes an `M` payload.
pub fn encode_match_window(first: u32, maxitems: u32) -> Vec<u8> {
    let mut out = Vec::new();
    pack_uint(&mut out, u64::from(first));
    pack_uint(&mut out, u64::from(maxitems));
    out
}

/// Decodes an `M` payload.
pub fn decode_match_window(payload: &[u8]) -> Result<(u32, u32), RemoteError> {
    let corrupt = |err: quern_query::QueryError| RemoteError::corrupt(err.to_string());
    let input = &mut &payload[..];
    let first = unpack_uint(input).map_err(corrupt)? as u32;
    let maxitems = unpack_uint(input).map_err(corrupt)? as u32;
    Ok((first, maxitems))
}

/// Encodes an `O` payload.
pub fn encode_mset(mset: &MSet) -> Vec<u8> {
    let mut out = Vec::new();
    pack_uint(&mut out, u64::from(mset.first));
    pack_uint(&mut out, u64::from(mset.matches_lower_bound));
    pack_uint(&mut out, u64::from(mset.matches_estimated));
    pack_uint(&mut out, u64::from(mset.matches_upper_bound));
    pack_double(&mut out, mset.max_possible);
    pack_double(&mut out, mset.max_attained);
    pack_double(&mut out, mset.percent_factor);

    pack_uint(&mut out, mset.items.len() as u64);
    for item in &mset.items {
        pack_double(&mut out, item.weight);
        pack_uint(&mut out, u64::from(item.did));
        match &item.collapse_key {
            Some(key) => {
                pack_bool(&mut out, true);
                pack_string(&mut out, key);
            }
            None => pack_bool(&mut out, false),
        }
        pack_uint(&mut out, u64::from(item.collapse_count));
        match &item.sort_key {
            Some(key) => {
                pack_bool(&mut out, true);
                pack_string(&mut out, key);
            }
            None => pack_bool(&mut out, false),
        }
    }

    pack_uint(&mut out, mset.termfreqandwts.len() as u64);
    for (term, info) in &mset.termfreqandwts {
        pack_string(&mut out, term);
        pack_uint(&mut out, u64::from(info.termfreq));
        pack_double(&mut out, info.termweight);
    }
    out
}

/// Decodes an `O` payload.
pub fn decode_mset(payload: &[u8]) -> Result<MSet, RemoteError> {
    let corrupt = |err: quern_query::QueryError| RemoteError::corrupt(err.to_string());
    let input = &mut &payload[..];
    let mut mset = MSet::default();
    mset.first = unpack_uint(input).map_err(corrupt)? as u32;
    mset.matches_lower_bound = unpack_uint(input).map_err(corrupt)? as u32;
    mset.matches_estimated = unpack_uint(input).map_err(corrupt)? as u32;
    mset.matches_upper_bound = unpack_uint(input).map_err(corrupt)? as u32;
    mset.max_possible = unpack_double(input).map_err(corrupt)?;
    mset.max_attained = unpack_double(input).map_err(corrupt)?;
    mset.percent_factor = unpack_double(input).map_err(corrupt)?;

    let n_items = unpack_uint(input).map_err(corrupt)?;
    for _ in 0..n_items {
        let weight = unpack_double(input).map_err(corrupt)?;
        let did = unpack_uint(input).map_err(corrupt)? as u32;
        let mut item = MSetItem::new(weight, did);
        if unpack_bool(input).map_err(corrupt)? {
            item.collapse_key = Some(unpack_string(input).map_err(corrupt)?);
        }
        item.collapse_count = unpack_uint(input).map_err(corrupt)? as u32;
        if unpack_bool(input).map_err(corrupt)? {
            item.sort_key = Some(unpack_string(input).map_err(corrupt)?);
        }
        mset.items.push(item);
    }

    let n_terms = unpack_uint(input).map_err(corrupt)?;
    for _ in 0..n_terms {
        let term = unpack_string(input).map_err(corrupt)?;
        let termfreq = unpack_uint(input).map_err(corrupt)? as u32;
        let termweight = unpack_double(input).map_err(corrupt)?;
        mset.termfreqandwts
            .insert(term, TermFreqAndWeight { termfreq, termweight });
    }
    Ok(mset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quern_weight::Bm25Weight;

    #[test]
    fn query_message_round_trips() {
        let query = Query::and(vec![Query::term("ripe"), Query::term("mango")]);
        let weight = Bm25Weight::default();
        let mut rset = RSet::new();
        rset.add_document(4);
        let options = MatchOptions::new().collapse(2, 1).percent_cutoff(30);

        let payload = encode_query(&query, &weight, &rset, &options);
        let decoded = decode_query(&payload).unwrap();
        assert_eq!(decoded.query, query);
        assert_eq!(decoded.weight.name(), "bm25");
        assert!(decoded.rset.contains(4));
        assert_eq!(decoded.options.collapse_key, Some(2));
        assert_eq!(decoded.options.percent_cutoff, 30);
    }

    #[test]
    fn stats_round_trip() {
        let mut stats = Stats::new();
        stats.add_collection(10, 4.5, 45, (2, 9));
        stats.add_total_term_count(45);
        stats.add_termfreq("mango", 3, 5, 2);
        stats.add_reltermfreq("mango", 1);
        stats.add_rset_size(2);
        stats.add_value_stats(
            1,
            &ValueStats {
                lower_bound: "a".into(),
                upper_bound: "z".into(),
                freq: 7,
            },
        );

        let decoded = decode_stats(&encode_stats(&stats)).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn mset_round_trips() {
        let mut mset = MSet::default();
        mset.first = 2;
        mset.matches_lower_bound = 3;
        mset.matches_estimated = 4;
        mset.matches_upper_bound = 9;
        mset.max_possible = 7.5;
        mset.max_attained = 6.25;
        mset.percent_factor = 13.3;
        let mut item = MSetItem::new(6.25, 11);
        item.collapse_key = Some("k".into());
        item.collapse_count = 2;
        mset.items.push(item);
        mset.items.push(MSetItem::new(1.5, 3));
        mset.termfreqandwts.insert(
            "mango".into(),
            TermFreqAndWeight {
                termfreq: 3,
                termweight: 1.25,
            },
        );

        let decoded = decode_mset(&encode_mset(&mset)).unwrap();
        assert_eq!(decoded.items, mset.items);
        assert_eq!(decoded.matches_upper_bound, 9);
        assert_eq!(decoded.termfreqandwts, mset.termfreqandwts);
    }

    #[test]
    fn frames_round_trip_over_loopback() {
        let (client, server) = crate::channel::loopback();
        let mut client = Connection::new(Box::new(client));
        let mut server = Connection::new(Box::new(server));

        server.send_handshake(42, 3.25).unwrap();
        let (doccount, avlength) = client.read_handshake().unwrap();
        assert_eq!(doccount, 42);
        assert!((avlength - 3.25).abs() < 1e-12);

        client.send(MessageTag::KeepAlive, &[]).unwrap();
        let (tag, payload) = server.receive().unwrap();
        assert_eq!(tag, MessageTag::KeepAlive);
        assert!(payload.is_empty());
    }
}
