//! 纯文本输出：watch --plain 的逐行刷新，list 命令的分页表格，以及 storage 命令的存储视图。

use std::io::{self, Write};

use indicatif::HumanBytes;

use super::{Renderer, truncate_title};
use crate::download::models::DownloadRow;
use crate::download::paginate::paginate;
use crate::download::poller::{CycleOutcome, PollState};
use crate::download::storage::{InventoryEntry, StorageView};

pub fn format_speed(speed_bps: f64) -> String {
    if speed_bps > 0.0 {
        format!("{}/s", HumanBytes(speed_bps.round() as u64))
    } else {
        "--".to_string()
    }
}

pub fn format_row(row: &DownloadRow, compact: bool) -> String {
    let mut line = format!(
        "{:>3}%  {:<11}  {:>12}  eta {:>8}  {}",
        row.percent,
        row.status.to_string(),
        format_speed(row.speed_bps),
        row.eta.to_string(),
        truncate_title(&row.title, 48),
    );
    if !compact {
        line.push_str(&format!("  [blobs {}]", row.blobs_text()));
        if row.total_bytes > 0 {
            line.push_str(&format!(
                "  {}/{}",
                HumanBytes(row.written_bytes),
                HumanBytes(row.total_bytes)
            ));
        }
        if let Some(channel) = row.channel.as_deref().or(row.channel_claim_id.as_deref()) {
            line.push_str(&format!("  {channel}"));
        }
        line.push_str(&format!("  {}", row.uri.as_deref().unwrap_or(&row.claim_id)));
    }
    line
}

pub struct PlainRenderer<W: Write> {
    out: W,
    compact: bool,
}

impl PlainRenderer<io::Stdout> {
    pub fn stdout(compact: bool) -> Self {
        Self::new(io::stdout(), compact)
    }
}

impl<W: Write> PlainRenderer<W> {
    pub fn new(out: W, compact: bool) -> Self {
        Self { out, compact }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_state(&mut self, state: &PollState, outcome: CycleOutcome) -> io::Result<()> {
        if outcome == CycleOutcome::Failed {
            writeln!(
                self.out,
                "-- 守护进程无响应（连续 {} 次），显示上次结果",
                state.consecutive_failures
            )?;
        }
        let rows = state.incomplete_rows();
        writeln!(self.out, "== 进行中或缺失数据: {} 项", rows.len())?;
        if rows.is_empty() {
            writeln!(self.out, "没有进行中或缺失数据的下载")?;
        }
        for row in &rows {
            writeln!(self.out, "{}", format_row(row, self.compact))?;
        }
        self.out.flush()
    }
}

impl<W: Write> Renderer for PlainRenderer<W> {
    fn render(&mut self, state: &PollState, outcome: CycleOutcome) {
        let _ = self.write_state(state, outcome);
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}

/// `list` 命令输出的一页。
pub fn write_list<W: Write>(
    out: &mut W,
    rows: &[DownloadRow],
    page: usize,
    page_size: usize,
    compact: bool,
) -> io::Result<()> {
    let page = paginate(rows, page, page_size);
    if page.items.is_empty() {
        writeln!(out, "没有进行中或缺失数据的下载")?;
    }
    for row in page.items {
        writeln!(out, "{}", format_row(row, compact))?;
    }
    writeln!(
        out,
        "-- 第 {}/{} 页，共 {} 项",
        page.page,
        page.total_pages,
        rows.len()
    )?;
    Ok(())
}

/// storage 命令的显示选项。
#[derive(Debug, Clone, Default)]
pub struct StorageQuery {
    pub search: String,
    pub group: bool,
    pub page: usize,
    pub page_size: usize,
}

fn entry_properties(entry: Option<&InventoryEntry>) -> String {
    let Some(e) = entry else {
        return String::new();
    };
    format!(
        "  [blobs {} | {} | {} | {}]",
        e.blobs_text(),
        e.size_text(),
        if e.saved_file { "已保存" } else { "未保存" },
        if e.pinned { "已置顶" } else { "未置顶" },
    )
}

fn write_claim<W: Write>(out: &mut W, view: &StorageView, uri: &str) -> io::Result<()> {
    writeln!(
        out,
        "  {}{}  {uri}",
        truncate_title(&view.title_of(uri), 48),
        entry_properties(view.entry_for_uri(uri)),
    )
}

pub fn write_storage<W: Write>(
    out: &mut W,
    view: &StorageView,
    query: &StorageQuery,
) -> io::Result<()> {
    if let Some(t) = view.totals {
        writeln!(
            out,
            "网络: {} MB | 内容: {} MB | 私有: {} MB | 总计: {} MB",
            t.network_mb, t.content_mb, t.private_mb, t.total_mb
        )?;
    }

    writeln!(out, "== 置顶 ({})", view.pinned_uris.len())?;
    if view.pinned_uris.is_empty() {
        writeln!(out, "  没有置顶")?;
    }
    for uri in &view.pinned_uris {
        write_claim(out, view, uri)?;
    }

    let uris = view.filtered_uris(&query.search);
    writeln!(out, "== 已存储 ({})", uris.len())?;
    if uris.is_empty() {
        writeln!(out, "  没有已存储的内容")?;
    }

    if query.group {
        for (channel, members) in view.grouped(&query.search) {
            writeln!(out, "-- {channel} ({})", members.len())?;
            for uri in members {
                write_claim(out, view, uri)?;
            }
        }
        return Ok(());
    }

    let page = paginate(&uris, query.page, query.page_size);
    for uri in page.items {
        write_claim(out, view, uri)?;
    }
    writeln!(out, "-- 第 {}/{} 页", page.page, page.total_pages)?;

    let unmapped = view.unmapped();
    if unmapped.is_empty() {
        return Ok(());
    }
    writeln!(out, "== 仅有哈希的条目 ({})", unmapped.len())?;
    let page = paginate(&unmapped, query.page, query.page_size);
    for entry in page.items {
        let target = entry
            .pin_target()
            .map(|t| t.param().1.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "  {}  {}  blobs {}  {}  {}  {target}",
            truncate_title(&view.unmapped_title(entry), 40),
            view.unmapped_channel(entry),
            entry.blobs_text(),
            entry.size_text(),
            if entry.pinned { "已置顶" } else { "未置顶" },
        )?;
    }
    writeln!(out, "-- 第 {}/{} 页", page.page, page.total_pages)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::{Eta, StatusLabel};
    use crate::download::storage::StorageTotals;

    fn row(id: &str, percent: u8) -> DownloadRow {
        DownloadRow {
            claim_id: id.to_string(),
            title: format!("title {id}"),
            channel: Some("@chan".into()),
            channel_claim_id: None,
            uri: None,
            percent,
            speed_bps: 2048.0,
            eta: Eta::Seconds(65),
            status: StatusLabel::Downloading,
            blobs_present: 3,
            blobs_total: 10,
            written_bytes: 512,
            total_bytes: 1024,
            completed: false,
        }
    }

    #[test]
    fn row_line_contains_metrics() {
        let line = format_row(&row("a1", 42), false);
        assert!(line.contains(" 42%"));
        assert!(line.contains("Downloading"));
        assert!(line.contains("2.00 KiB/s"));
        assert!(line.contains("1:05"));
        assert!(line.contains("[blobs 3/10]"));
        assert!(line.contains("@chan"));
        assert!(line.contains("512 B/1.00 KiB"));
        assert!(line.ends_with("a1"));
    }

    #[test]
    fn compact_line_omits_details() {
        let line = format_row(&row("a1", 42), true);
        assert!(!line.contains("blobs"));
        assert!(!line.contains("@chan"));
        assert_eq!(format_speed(0.0), "--");
    }

    #[test]
    fn list_prints_requested_page() {
        let rows: Vec<_> = (0..5).map(|i| row(&format!("id{i}"), 10)).collect();
        let mut out = Vec::new();
        write_list(&mut out, &rows, 2, 2, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("title id2"));
        assert!(text.contains("title id3"));
        assert!(!text.contains("title id4"));
        assert!(text.contains("第 2/3 页，共 5 项"));
    }

    #[test]
    fn renderer_reports_failed_cycle() {
        let mut r = PlainRenderer::new(Vec::new(), true);
        let state = PollState {
            consecutive_failures: 2,
            ..PollState::default()
        };
        r.render(&state, CycleOutcome::Failed);
        let text = String::from_utf8(r.into_inner()).unwrap();
        assert!(text.contains("连续 2 次"));
        assert!(text.contains("没有进行中"));
    }

    fn storage_view() -> StorageView {
        let stored = |name: &str, id: &str, pinned: bool| InventoryEntry {
            claim_id: Some(id.to_string()),
            name: Some(name.to_string()),
            blobs_present: Some(2),
            blobs_total: Some(4),
            size_mb: Some(8.0),
            pinned,
            ..InventoryEntry::default()
        };
        let hash_only = InventoryEntry {
            sd_hash: Some("sdfeed".into()),
            size_mb: Some(1.0),
            ..InventoryEntry::default()
        };
        StorageView {
            totals: Some(StorageTotals {
                network_mb: 1.0,
                content_mb: 16.0,
                private_mb: 0.0,
                total_mb: 17.0,
            }),
            entries: vec![stored("alpha", "aa", true), stored("beta", "bb", false), hash_only],
            pinned_uris: vec!["lbry://alpha#aa".into()],
            uris: vec!["lbry://alpha#aa".into(), "lbry://beta#bb".into()],
            ..StorageView::default()
        }
    }

    #[test]
    fn storage_lists_totals_pins_and_hash_only_entries() {
        let mut out = Vec::new();
        let query = StorageQuery {
            page: 1,
            page_size: 20,
            ..StorageQuery::default()
        };
        write_storage(&mut out, &storage_view(), &query).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("网络: 1 MB | 内容: 16 MB | 私有: 0 MB | 总计: 17 MB"));
        assert!(text.contains("== 置顶 (1)"));
        assert!(text.contains("alpha  [blobs 2/4 | 8 MB | 未保存 | 已置顶]  lbry://alpha#aa"));
        assert!(text.contains("== 已存储 (2)"));
        assert!(text.contains("== 仅有哈希的条目 (1)"));
        assert!(text.contains("sdfeed"));
    }

    #[test]
    fn storage_search_and_grouping() {
        let mut out = Vec::new();
        let query = StorageQuery {
            search: "BETA".into(),
            group: true,
            page: 1,
            page_size: 20,
        };
        write_storage(&mut out, &storage_view(), &query).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("== 已存储 (1)"));
        assert!(text.contains("-- Unspecified (1)"));
        assert!(text.contains("lbry://beta#bb"));
        assert!(!text.contains("仅有哈希"));
    }
}
