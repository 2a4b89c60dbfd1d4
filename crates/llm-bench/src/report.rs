//! Terminal output

use comfy_table::{presets::UTF8_FULL, Table};

use libllmbench::{RunSummary, TestCase};

fn metric(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string())
}

/// Test matrix, one line per case in execution order
pub fn print_matrix(cases: &[TestCase]) {
    if cases.is_empty() {
        println!("No test cases.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Input Tokens", "Output Tokens", "Concurrency", "Requests"]);
    for case in cases {
        table.add_row(vec![
            case.index.to_string(),
            case.context.input_tokens.to_string(),
            case.context.output_tokens.to_string(),
            case.batch.batch_size.to_string(),
            case.batch.request_count.to_string(),
        ]);
    }
    println!("{}", table);
    println!("{} test cases", cases.len());
}

pub fn print_summary(summary: &RunSummary) {
    let Some(path) = &summary.result_path else {
        println!("Nothing was run.");
        return;
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Input", "Output", "Concurrency", "Requests", "TTFT(s)", "TPOT(s)", "Throughput", "Duration(s)", "Comment",
    ]);
    for row in &summary.rows {
        table.add_row(vec![
            row.input_tokens.to_string(),
            row.output_tokens.to_string(),
            row.concurrency.to_string(),
            row.request_count.to_string(),
            metric(row.ttft),
            metric(row.tpot),
            metric(row.throughput),
            metric(row.duration),
            row.comment.clone(),
        ]);
    }
    println!("{}", table);

    println!("=== RESULTS ===");
    println!(
        "Cases: {}, Measured: {}, Skipped: {}, Failed: {}{}",
        summary.total_cases,
        summary.measured,
        summary.skipped,
        summary.failed,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    println!("Results saved to {}", path.display());
}
