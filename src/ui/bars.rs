//! indicatif 进度条渲染：每个未完成的下载一条进度条，消失的条目在下一轮移除。

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::noui::format_speed;
use super::{Renderer, truncate_title};
use crate::download::models::DownloadRow;
use crate::download::poller::{CycleOutcome, PollState};

pub struct BarRenderer {
    mp: MultiProgress,
    header: ProgressBar,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
    compact: bool,
}

impl BarRenderer {
    pub fn new(compact: bool) -> Self {
        Self::with_target(compact, ProgressDrawTarget::stderr())
    }

    /// 指定绘制目标（测试里用 `hidden()`）。
    pub fn with_target(compact: bool, target: ProgressDrawTarget) -> Self {
        let mp = MultiProgress::with_draw_target(target);
        let header = mp.add(ProgressBar::new_spinner());
        header.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        header.set_message("正在连接守护进程…");

        let style = ProgressStyle::with_template(
            "{prefix:30} [{bar:30.cyan/blue}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self {
            mp,
            header,
            bars: HashMap::new(),
            style,
            compact,
        }
    }

    fn message(&self, row: &DownloadRow) -> String {
        let mut msg = format!(
            "{}  {}  eta {}",
            row.status,
            format_speed(row.speed_bps),
            row.eta
        );
        if !self.compact {
            msg.push_str(&format!("  blobs {}", row.blobs_text()));
        }
        msg
    }

    fn sync_bars(&mut self, rows: &[DownloadRow]) {
        self.bars.retain(|id, bar| {
            let keep = rows.iter().any(|r| &r.claim_id == id);
            if !keep {
                bar.finish_and_clear();
                self.mp.remove(bar);
            }
            keep
        });

        for row in rows {
            let message = self.message(row);
            let bar = self.bars.entry(row.claim_id.clone()).or_insert_with(|| {
                let bar = self.mp.add(ProgressBar::new(100));
                bar.set_style(self.style.clone());
                bar
            });
            bar.set_prefix(truncate_title(&row.title, 30));
            bar.set_position(u64::from(row.percent));
            bar.set_message(message);
        }
    }
}

impl Renderer for BarRenderer {
    fn render(&mut self, state: &PollState, outcome: CycleOutcome) {
        let rows = state.incomplete_rows();
        let header = match outcome {
            CycleOutcome::Failed => format!(
                "守护进程无响应（连续 {} 次），显示上次结果",
                state.consecutive_failures
            ),
            _ if rows.is_empty() => "没有进行中或缺失数据的下载".to_string(),
            _ => format!("进行中或缺失数据: {} 项", rows.len()),
        };
        self.header.set_message(header);
        self.header.tick();
        self.sync_bars(&rows);
    }

    fn finish(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.abandon();
        }
        self.header.finish_and_clear();
    }
}
