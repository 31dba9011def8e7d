//! 下载监控模块入口。
//!
//! 子模块：
//! - `models`   — 数据模型（FileSnapshot / MetricSample / DownloadRow 等）
//! - `metrics`  — 进度、速度、剩余时间估算与状态归类
//! - `uri`      — lbry:// URI 构造与解析
//! - `paginate` — 列表分页
//! - `poller`   — 顺序轮询循环与取消控制
//! - `actions`  — 暂停 / 继续 / 删除
//! - `storage`  — 存储库存、置顶、搜索与按频道分组

pub mod actions;
pub mod metrics;
pub mod models;
pub mod paginate;
pub mod poller;
pub mod storage;
pub mod uri;
