use crate::registry::probe_one;
use crate::traits::MirrorProbe;
use crate::types::ProbeReport;
use indicatif::{ProgressBar, ProgressStyle};

/// 并发测试所有镜像源的延迟
///
/// 逻辑:
/// 1. 为每个镜像生成一个金丝雀查询任务
/// 2. 并行等待所有任务完成 (join_all)
/// 3. 可用的按延迟从小到大排序, 不可用的排在最后
pub async fn benchmark_mirrors(probe: &dyn MirrorProbe, addresses: &[String]) -> Vec<ProbeReport> {
    let pb = ProgressBar::new(addresses.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {percent}% {msg}") {
        pb.set_style(style.progress_chars("|| "));
    }
    pb.set_message("Probing...");

    let tasks = addresses.iter().map(|address| {
        let pb = pb.clone();
        async move {
            let report = probe_one(probe, address).await;
            pb.inc(1);
            report
        }
    });

    let mut results = futures::future::join_all(tasks).await;

    pb.finish_with_message("Probing completed.");

    rank(&mut results);
    results
}

/// Usable mirrors first, fastest first.
pub fn rank(reports: &mut [ProbeReport]) {
    reports.sort_by_key(|r| (!r.is_usable(), r.latency));
}
