#![forbid(unsafe_code)]

//! Core building blocks shared by zfsync crates.
//!
//! The dataset tree, the listing reconciler, configuration, and the error
//! taxonomy live here so `zfsync-zfs` can focus on running commands.

pub mod config;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod tree;

pub use config::{ConfigFormat, RemoteCfg, TransferCfg, ZfsCfg, ZfsyncConfig};
pub use error::{PipelineFailure, StageFailure, StageRole, ZfsyncError, ZfsyncResult};
pub use reconcile::{reconcile, ReconcileReport};
pub use tree::{Node, NodeId, NodeKind, Tree};
