//! Protobuf definitions for the subset of the discovery wire format this
//! client reads and writes.
//!
//! Field numbers follow the upstream `.proto` files; fields the client never
//! inspects are left out and skipped by the decoder. Resource messages also
//! derive `Serialize` so cache snapshots can be written as JSON.

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod listener;
pub mod route;

use serde::Serialize;

/// `google.protobuf.Any`.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// `google.protobuf.UInt32Value`.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message, Serialize)]
pub struct UInt32Value {
    #[prost(uint32, tag = "1")]
    pub value: u32,
}
