//! Bin 计算
//!
//! bin 是 `频道:体系结构` 形式的等价类，用于把空闲任务和有能力
//! 执行它的主机取交集。noarch 任务落入合成的 `频道:noarch` bin，
//! 每台主机都属于其频道对应的 noarch bin。

use std::collections::BTreeSet;

/// noarch 体系结构标记
pub const NOARCH: &str = "noarch";

/// 构造 bin 键
pub fn bin_key(channel_id: i64, arch: &str) -> String {
    format!("{channel_id}:{arch}")
}

/// 任务所属的唯一 bin
pub fn task_bin(channel_id: i64, arch: Option<&str>) -> String {
    bin_key(channel_id, arch.unwrap_or(NOARCH))
}

/// 主机覆盖的 bin 集合
///
/// 频道 × 体系结构的笛卡尔积，外加每个频道的 noarch bin。
/// 结果去重且有序，便于比较和测试。
pub fn host_bins(channels: &[i64], arches: &str) -> Vec<String> {
    let mut bins = BTreeSet::new();
    for channel in channels {
        for arch in arches.split_whitespace() {
            bins.insert(bin_key(*channel, arch));
        }
        bins.insert(bin_key(*channel, NOARCH));
    }
    bins.into_iter().collect()
}
