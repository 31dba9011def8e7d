//! 交互层入口。
//!
//! 包含 indicatif 进度条与纯文本两套渲染实现。

pub mod bars;
pub mod noui;

use crate::download::poller::{CycleOutcome, PollState};

pub trait Renderer {
    fn render(&mut self, state: &PollState, outcome: CycleOutcome);
    fn finish(&mut self);
}

pub fn truncate_title(title: &str, max_chars: usize) -> String {
    let title = title.trim();
    if title.chars().count() <= max_chars {
        return title.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    title.chars().take(keep).collect::<String>() + "…"
}
