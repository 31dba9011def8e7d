//! 下载管理操作：暂停 / 继续 / 全部继续 / 删除。

use tracing::{info, warn};

use super::models::FileSnapshot;
use crate::daemon_api::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Start,
    Stop,
}

impl StatusChange {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusChange::Start => "start",
            StatusChange::Stop => "stop",
        }
    }
}

pub trait FileControl {
    fn set_status(&self, claim_id: &str, change: StatusChange) -> Result<(), RpcError>;
    fn delete(&self, claim_id: &str, delete_file: bool) -> Result<bool, RpcError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResumeSummary {
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub fn pause(ctl: &impl FileControl, claim_id: &str) -> Result<(), RpcError> {
    ctl.set_status(claim_id, StatusChange::Stop)?;
    info!(target: "actions", claim_id, "已暂停");
    Ok(())
}

pub fn resume(ctl: &impl FileControl, claim_id: &str) -> Result<(), RpcError> {
    ctl.set_status(claim_id, StatusChange::Start)?;
    info!(target: "actions", claim_id, "已继续");
    Ok(())
}

pub fn remove(ctl: &impl FileControl, claim_id: &str, delete_file: bool) -> Result<bool, RpcError> {
    let removed = ctl.delete(claim_id, delete_file)?;
    info!(target: "actions", claim_id, delete_file, removed, "删除请求完成");
    Ok(removed)
}

/// “全部继续”会启动的条目：未完成且未在运行。
pub fn resumable(snapshots: &[FileSnapshot]) -> impl Iterator<Item = &FileSnapshot> {
    snapshots
        .iter()
        .filter(|s| !s.claim_id.is_empty() && !s.completed && !s.is_running())
}

/// 启动所有可继续的条目；前面的请求失败也不影响后面的请求。
pub fn resume_all(ctl: &impl FileControl, snapshots: &[FileSnapshot]) -> ResumeSummary {
    let mut summary = ResumeSummary::default();
    for snap in resumable(snapshots) {
        match ctl.set_status(&snap.claim_id, StatusChange::Start) {
            Ok(()) => summary.started.push(snap.claim_id.clone()),
            Err(err) => {
                warn!(target: "actions", claim_id = %snap.claim_id, "继续下载失败: {err}");
                summary.failed.push((snap.claim_id.clone(), err.to_string()));
            }
        }
    }
    info!(
        target: "actions",
        started = summary.started.len(),
        failed = summary.failed.len(),
        "全部继续完成"
    );
    summary
}
