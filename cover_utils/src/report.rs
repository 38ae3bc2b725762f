//! Report Module
//!
//! Boxed end-of-batch summary for the command line.

use std::time::Duration;

use crate::batch::BatchResult;
use crate::orchestrator::BatchReport;
use crate::progress::format_duration;

pub fn print_summary_report(result: &BatchResult, report: &BatchReport, duration: Duration, operation_name: &str) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  📊 {:<56} ║", format!("{} Summary", operation_name));
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🎵 Tracks:             {:>10}                           ║", result.total);
    println!("║  ✅ Succeeded:          {:>10}                           ║", result.succeeded);
    println!("║  ❌ Failed:             {:>10}                           ║", result.failed);
    println!("║  ⏭️  Skipped:            {:>10}                           ║", result.skipped);
    println!("║  📈 Success Rate:       {:>9.1}%                           ║", result.success_rate());
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🧩 Batch Shape:        {:>10}                           ║", shape_label(report));
    println!("║  🗂️  Unique Covers:      {:>10}                           ║", report.buckets);
    println!("║  🖼️  Covers Processed:   {:>10}                           ║", report.invocations);
    println!("║  🔍 Hashes Computed:    {:>10}                           ║", report.perceptual_hashes);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  ⏱️  Total Time:         {:>10}                           ║", format_duration(duration));
    println!("╚══════════════════════════════════════════════════════════════╝");

    if !result.errors.is_empty() {
        println!();
        println!("❌ Errors encountered:");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        for (path, error) in &result.errors {
            println!("   {} → {}", path.display(), error);
        }
    }
    if !result.skip_reasons.is_empty() {
        println!();
        println!("⏭️  Kept source image:");
        for (path, reason) in &result.skip_reasons {
            println!("   {} → {}", path.display(), reason);
        }
    }
}

fn shape_label(report: &BatchReport) -> String {
    let label = report.shape.to_string();
    // "group (each unique)" is wider than the column
    label.replace("group ", "")
}
