//! LSF Core Library
//!
//! Lighting fleet controller: replicated entity stores (presets, lamp
//! groups, scenes, master scenes) persisted as checksummed blobs, rank-based
//! leader election with blob sync between controllers, and aggregate lamp
//! calls fanned out over per-lamp sessions.

pub mod clock;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod election;
pub mod error;
pub mod fanout;
pub mod lamp;
pub mod lamp_link;
pub mod managers;
pub mod notify;
pub mod persistence;
pub mod rank;
pub mod rpc;
pub mod service;
pub mod sim;
pub mod store;
pub mod transport;
pub mod types;

pub use config::ControllerConfig;
pub use discovery::Discovery;
pub use election::LeaderElector;
pub use error::{LsfError, LsfResult, ResponseCode};
pub use fanout::LampClients;
pub use rpc::{MethodCall, MethodReply};
pub use service::ControllerService;
pub use transport::Transport;
pub use types::*;
