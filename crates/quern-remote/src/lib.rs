//! Remote shard protocol for quern.
//!
//! A match can span shards served by other processes. This crate
//! provides both halves:
//!
//! - [`RemoteShard`]: the client side, plugging a served shard into
//!   [`quern_match::Enquire`] through the `Shard` trait
//! - [`serve`]: the server side, answering one connection's worth of
//!   match and point-query traffic over a local database
//!
//! The transport is any [`ByteChannel`] — TCP and Unix sockets out of
//! the box, or the in-process [`loopback`] pair for tests. After a
//! one-line handshake, both directions speak tagged binary frames built
//! on the shared serialisation primitives.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use quern_match::{Enquire, MemoryDatabase, Shard};
//! use quern_query::Query;
//! use quern_remote::{RemoteShard, loopback, serve};
//!
//! let mut db = MemoryDatabase::new();
//! db.add_text("ripe mango");
//! let db = Arc::new(db);
//!
//! let (client_end, server_end) = loopback();
//! let server = std::thread::spawn(move || serve(db, Box::new(server_end)));
//!
//! let shard = RemoteShard::connect(Box::new(client_end)).unwrap();
//! let mut enquire = Enquire::over_shards(vec![Box::new(shard) as Box<dyn Shard>]);
//! enquire.set_query(Query::term("mango"));
//! let mset = enquire.mset(0, 10, None).unwrap();
//! assert_eq!(mset.len(), 1);
//!
//! // Closing every handle ends the served connection.
//! drop(mset);
//! drop(enquire);
//! server.join().unwrap();
//! ```

#![warn(missing_docs)]

mod channel;
mod client;
mod error;
mod server;
mod wire;

pub use channel::{BrokenChannel, ByteChannel, LoopbackChannel, loopback};
pub use client::{RemoteDatabase, RemoteShard, RemoteSubMatch};
pub use error::RemoteError;
pub use server::serve;
pub use wire::{Connection, MessageTag, PROTOCOL_MAGIC, PROTOCOL_VERSION};
