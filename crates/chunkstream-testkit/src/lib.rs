//! # Chunkstream Testkit
//!
//! Testing utilities for chunkstream.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a gated [`TestClient`], a stepping [`TestServer`] and
//!   store fillers
//! - **Harness**: [`StreamerTester`], a running streamer with the test
//!   playing the remote peer
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Streamer Harness
//!
//! ```rust,no_run
//! use chunkstream_core::{Priority, StreamId};
//! use chunkstream_sync::Registry;
//! use chunkstream_testkit::{StreamerTester, TestClient};
//!
//! async fn example() {
//!     let client = TestClient::wanting(Vec::new());
//!     let mut registry = Registry::new();
//!     client.register(&mut registry, "foo");
//!
//!     let tester = StreamerTester::new(registry).await;
//!     tester.subscribe(StreamId::new("foo", true), None, Priority::Top).unwrap();
//!     let subscribe = tester.expect().await;
//!     println!("{:?}", subscribe);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use chunkstream_testkit::generators::SubscriptionParams;
//!
//! proptest! {
//!     #[test]
//!     fn history_key_is_historical(params: SubscriptionParams) {
//!         prop_assert!(!params.stream.history().is_live());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    chunk_data, fill_store, hash, init_tracing, random_chunk, StreamerTester, TestClient,
    TestServer, EXPECT_TIMEOUT,
};
pub use generators::SubscriptionParams;
