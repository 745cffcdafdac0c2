//! Common traits and test helpers used across the echorpc library

pub mod test_utils;
pub mod traits;

pub use test_utils::{
    ScriptedPeer, TestServer, create_controlled_test_server_with_limit, spawn_test_server,
};
pub use traits::RpcServer;
