//! Operator-facing terminal output: device tables and confirmation prompts.

use std::io::{self, BufRead, Write};

use tern_types::Device;

const HEADER: [&str; 11] = [
    "ID",
    "REGION",
    "ZONE",
    "IP ADDRESS",
    "PORT",
    "REPLICATION IP",
    "REPLICATION PORT",
    "NAME",
    "WEIGHT",
    "PARTITIONS",
    "META",
];

/// Render devices as a left-aligned table, one device per line.
pub fn device_table<'a>(devices: impl IntoIterator<Item = &'a Device>) -> String {
    let mut rows: Vec<Vec<String>> = vec![HEADER.iter().map(|h| h.to_string()).collect()];
    for dev in devices {
        rows.push(vec![
            dev.id.to_string(),
            dev.region.to_string(),
            dev.zone.to_string(),
            dev.ip.clone(),
            dev.port.to_string(),
            dev.replication_ip.clone(),
            dev.replication_port.to_string(),
            dev.device.clone(),
            dev.weight.to_string(),
            dev.parts.to_string(),
            dev.meta.clone(),
        ]);
    }

    let mut widths = vec![0; HEADER.len()];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in &rows {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join(" ").trim_end());
        out.push('\n');
    }
    out
}

/// Print `question` and read a y/n answer from stdin.
///
/// Anything not starting with `y` or `Y` (including EOF) is a no.
pub fn confirm(question: &str) -> io::Result<bool> {
    print!("{question}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    answer.trim_start().starts_with(['y', 'Y'])
}
