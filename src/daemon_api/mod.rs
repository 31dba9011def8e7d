//! lbrynet 守护进程 JSON-RPC 接口。
//!
//! 子模块：
//! - `client`  — 请求封装（file_list / resolve / file_set_status / file_delete）
//! - `records` — 返回值到下载模型的宽容解析

pub mod client;
pub mod records;

pub use client::{DaemonClient, DaemonSource, RpcError};
