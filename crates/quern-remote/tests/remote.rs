//! Client/server tests over in-process channels.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use quern_match::{
    Database, Enquire, LocalShard, MatchError, MatchOptions, MemoryDatabase, Shard,
};
use quern_query::Query;
use quern_remote::{BrokenChannel, LoopbackChannel, RemoteShard, loopback, serve};

/// Spawns a server over one end of a loopback pair.
fn spawn_server(db: Arc<MemoryDatabase>) -> (LoopbackChannel, JoinHandle<()>) {
    let (client_end, server_end) = loopback();
    let handle = thread::spawn(move || serve(db, Box::new(server_end)));
    (client_end, handle)
}

/// The shared fruit corpus.
fn fruit_db() -> Arc<MemoryDatabase> {
    let mut db = MemoryDatabase::new();
    db.add_text("ripe mango");
    db.add_text("green mango");
    db.add_text("ripe apple");
    Arc::new(db)
}

#[test]
fn remote_match_equals_local_match() {
    let db = fruit_db();
    let query = Query::or(vec![Query::term("mango"), Query::term("apple")]);

    let local = {
        let mut enquire = Enquire::new(Arc::clone(&db) as Arc<dyn Database>);
        enquire.set_query(query.clone());
        enquire.mset(0, 10, None).expect("local match succeeds")
    };

    let (client_end, handle) = spawn_server(Arc::clone(&db));
    let shard = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");
    let remote = {
        let mut enquire = Enquire::over_shards(vec![Box::new(shard) as Box<dyn Shard>]);
        enquire.set_query(query);
        enquire.mset(0, 10, None).expect("remote match succeeds")
    };

    assert_eq!(local.len(), remote.len());
    for (a, b) in local.items.iter().zip(&remote.items) {
        assert_eq!(a.did, b.did);
        assert!((a.weight - b.weight).abs() < 1e-9);
    }
    assert_eq!(local.matches_upper_bound, remote.matches_upper_bound);
    assert_eq!(local.termfreqandwts, remote.termfreqandwts);
    drop(remote);
    handle.join().expect("server exits cleanly");
}

#[test]
fn remote_document_fetch_round_trips() {
    let db = fruit_db();
    let (client_end, handle) = spawn_server(Arc::clone(&db));
    let shard = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");

    let mut enquire = Enquire::over_shards(vec![Box::new(shard) as Box<dyn Shard>]);
    enquire.set_query(Query::term("apple"));
    let mset = enquire.mset(0, 10, None).expect("remote match succeeds");
    assert_eq!(mset.len(), 1);
    let doc = mset.fetch_document(0).expect("document travels back");
    assert_eq!(doc.data, "ripe apple");
    drop(mset);
    drop(enquire);
    handle.join().expect("server exits cleanly");
}

#[test]
fn mixed_local_and_remote_shards_equal_single_database() {
    // Interleaved split: even global docids on the remote shard.
    let mut single = MemoryDatabase::new();
    let mut local_shard = MemoryDatabase::new();
    let mut served = MemoryDatabase::new();
    for (index, text) in [
        "ripe mango",
        "green mango tree",
        "ripe apple",
        "mango mango mango",
    ]
    .iter()
    .enumerate()
    {
        single.add_text(text);
        if index % 2 == 0 {
            local_shard.add_text(text);
        } else {
            served.add_text(text);
        }
    }

    let query = Query::or(vec![Query::term("mango"), Query::term("ripe")]);
    let whole = {
        let mut enquire = Enquire::new(Arc::new(single));
        enquire.set_query(query.clone());
        enquire.mset(0, 10, None).expect("match succeeds")
    };

    let (client_end, handle) = spawn_server(Arc::new(served));
    let remote = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");
    let shards: Vec<Box<dyn Shard>> = vec![
        Box::new(LocalShard::new(Arc::new(local_shard))),
        Box::new(remote),
    ];
    let mixed = {
        let mut enquire = Enquire::over_shards(shards);
        enquire.set_query(query);
        enquire.mset(0, 10, None).expect("match succeeds")
    };

    assert_eq!(whole.len(), mixed.len());
    let mut whole_items: Vec<(u32, i64)> = whole
        .items
        .iter()
        .map(|item| (item.did, (item.weight * 1e9) as i64))
        .collect();
    let mut mixed_items: Vec<(u32, i64)> = mixed
        .items
        .iter()
        .map(|item| (item.did, (item.weight * 1e9) as i64))
        .collect();
    whole_items.sort_unstable();
    mixed_items.sort_unstable();
    assert_eq!(whole_items, mixed_items);
    drop(mixed);
    handle.join().expect("server exits cleanly");
}

#[test]
fn failed_shard_is_dropped_with_a_handler() {
    let local = fruit_db();
    let broken = RemoteShard::connect(Box::new(BrokenChannel));
    // The handshake already fails on a dead transport.
    assert!(broken.is_err());

    // A connection which dies after the handshake fails mid-match
    // instead; with a handler installed the match continues on the
    // healthy shard.
    let (client_end, server_end) = loopback();
    let dying_server = thread::spawn(move || {
        let mut conn = quern_remote::Connection::new(Box::new(server_end));
        conn.send_handshake(99, 4.0).expect("handshake goes out");
        // Connection dropped: the client's next read fails.
    });
    let remote = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");
    dying_server.join().expect("server thread exits");

    let shards: Vec<Box<dyn Shard>> = vec![
        Box::new(LocalShard::new(Arc::clone(&local) as Arc<dyn Database>)),
        Box::new(remote),
    ];
    let mut enquire = Enquire::over_shards(shards);
    enquire.set_query(Query::term("mango"));

    // Without a handler the failure aborts the match.
    let err = enquire.mset(0, 10, None).unwrap_err();
    assert!(matches!(
        err,
        MatchError::Network(_) | MatchError::NetworkTimeout(_)
    ));

    // With one, the surviving shard answers alone.
    enquire.set_error_handler(Box::new(|_err| {}));
    let mset = enquire.mset(0, 10, None).expect("degraded match succeeds");
    assert_eq!(mset.len(), 2);
    assert!(mset.matches_upper_bound <= local.doccount());
}

#[test]
fn keep_alive_and_close() {
    let db = fruit_db();
    let (client_end, handle) = spawn_server(db);
    let shard = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");
    shard.keep_alive().expect("keep-alive answered");
    shard.keep_alive().expect("keep-alive answered again");
    shard.close().expect("close goes out");
    handle.join().expect("server exits cleanly");
}

#[test]
fn read_timeout_surfaces_as_network_timeout() {
    // A peer that handshakes and then goes silent.
    let (client_end, server_end) = loopback();
    let silent_server = thread::spawn(move || {
        let mut conn = quern_remote::Connection::new(Box::new(server_end));
        conn.send_handshake(1, 1.0).expect("handshake goes out");
        // Hold the channel open without ever answering.
        thread::sleep(Duration::from_millis(300));
    });

    let shard = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");
    shard
        .set_timeout(Some(Duration::from_millis(20)))
        .expect("timeout set");
    let err = shard.keep_alive().unwrap_err();
    assert!(matches!(err, quern_remote::RemoteError::NetworkTimeout(_)));
    silent_server.join().expect("server thread exits");
}

#[test]
fn remote_match_error_travels_back() {
    let db = fruit_db();
    let (client_end, handle) = spawn_server(db);
    let shard = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");

    let mut enquire = Enquire::over_shards(vec![Box::new(shard) as Box<dyn Shard>]);
    // Positional operators over non-terms are refused server-side.
    enquire.set_query(Query::Phrase {
        window: 2,
        children: vec![
            Query::wildcard("ma"),
            Query::term("mango"),
        ],
    });
    let err = enquire.mset(0, 10, None).unwrap_err();
    assert!(matches!(err, MatchError::Unimplemented(_)), "got {err:?}");
    drop(enquire);
    handle.join().expect("server exits cleanly");
}

#[test]
fn decider_against_remote_shard_is_unimplemented() {
    struct AcceptAll;
    impl quern_match::MatchDecider for AcceptAll {
        fn accept(&self, _doc: &quern_match::Document) -> bool {
            true
        }
    }

    let db = fruit_db();
    let (client_end, handle) = spawn_server(db);
    let shard = RemoteShard::connect(Box::new(client_end)).expect("handshake succeeds");

    let mut enquire = Enquire::over_shards(vec![Box::new(shard) as Box<dyn Shard>]);
    enquire.set_query(Query::term("mango"));
    let mut options = MatchOptions::new();
    options.decider = Some(Box::new(AcceptAll));
    enquire.set_options(options);
    let err = enquire.mset(0, 10, None).unwrap_err();
    assert!(matches!(err, MatchError::Unimplemented(_)));
    drop(enquire);
    handle.join().expect("server exits cleanly");
}
