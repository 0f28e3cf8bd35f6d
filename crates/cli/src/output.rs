use crate::error::CliError;
use engine_runtime::job::JobStatusReport;
use model::{check::JobCheckResult, core::identifiers::ShardItem, job::status::JobStatus};
use std::collections::BTreeMap;

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_status(report: &JobStatusReport, as_json: bool) -> Result<(), CliError> {
    if as_json {
        return print_json(report);
    }

    println!("Job '{}':", report.job_id);
    println!(
        "{:<6} {:<22} {:<34} {:>10}  {}",
        "Item", "Name", "Status", "Records", "Position"
    );
    for item in &report.items {
        println!(
            "{:<6} {:<22} {:<34} {:>10}  {}",
            item.shard_item,
            item.name,
            item.status.as_str(),
            item.processed_record_count,
            item.position
        );
        if let Some(message) = &item.error_message {
            println!("       error: {message}");
        }
    }
    match &report.check {
        Some(check) => print_check_line(check),
        None => println!("Consistency check: n/a"),
    }
    Ok(())
}

pub fn print_check(result: &JobCheckResult, as_json: bool) -> Result<(), CliError> {
    if as_json {
        return print_json(result);
    }
    for (table, matched) in &result.tables {
        println!("{:<32} {}", table, if *matched { "matched" } else { "NOT matched" });
    }
    print_check_line(result);
    Ok(())
}

fn print_check_line(check: &JobCheckResult) {
    println!(
        "Consistency check ({}) at {}: {}",
        check.algorithm,
        check.checked_at.to_rfc3339(),
        if check.matched { "matched" } else { "NOT matched" }
    );
}

pub fn print_statuses(statuses: &BTreeMap<ShardItem, JobStatus>) {
    for (shard_item, status) in statuses {
        println!("shard item {shard_item}: {}", status.as_str());
    }
}
