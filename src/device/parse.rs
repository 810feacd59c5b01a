//! Pure text parsers for the three CCAP CLI dialects.
//!
//! Each function takes raw command output and extracts upstream/modulation
//! pairs; no I/O happens here, which keeps the dialects testable against
//! captured transcripts.

use std::sync::LazyLock;

use regex::Regex;

use crate::scan::{Modulation, ModulationRecord};

/// Platform modulation-profile codes to readable modulation.
///
/// Union of the legacy CCAP0 codes and the CCAP2 controller codes. Unknown
/// codes are dropped, not guessed.
#[must_use]
pub fn decode_modulation(code: &str) -> Option<Modulation> {
    match code {
        "202" | "224" | "228" | "364" => Some(Modulation::Qam64),
        "204" | "227" | "316" => Some(Modulation::Qam16),
        "222" | "226" | "220" | "300" => Some(Modulation::Qpsk),
        _ => None,
    }
}

/// CCAP0: `show interface cable-upstream` rows. An upstream is reported
/// when the row is in service (`IS`) and ATDMA; the modulation code sits in
/// the tenth column.
#[must_use]
pub fn parse_ccap0(device: &str, output: &str) -> Vec<ModulationRecord> {
    let mut records = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains('/') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        if !fields.contains(&"IS") || !fields.contains(&"atdma") {
            continue;
        }
        // scq-style ports carry a longer upstream name.
        let upstream_len = if fields[0].contains("scq") { 10 } else { 7 };
        let upstream: String = fields[0].chars().take(upstream_len).collect();
        if let Some(modulation) = decode_modulation(fields[9]) {
            records.push(ModulationRecord {
                device: device.to_string(),
                upstream,
                modulation,
            });
        }
    }
    records
}

/// CCAP1 bulk path: one `show spectrum hop-history` dump covering every
/// upstream. Rows are newest-first per upstream, so only the first sighting
/// of an upstream counts, and the TO-modulation column (9) is the current
/// state — column 8 is what it changed FROM.
#[must_use]
pub fn parse_ccap1_bulk(device: &str, output: &str) -> Vec<ModulationRecord> {
    let mut records = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("show") || line.contains("Port") {
            continue;
        }
        if !line.contains('M') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 || !fields[0].contains('/') {
            continue;
        }
        let upstream = fields[0];
        if seen.contains(upstream) {
            continue;
        }
        let code = fields.get(9).copied().unwrap_or(fields[8]);
        if let Some(modulation) = decode_modulation(code) {
            records.push(ModulationRecord {
                device: device.to_string(),
                upstream: upstream.to_string(),
                modulation,
            });
        }
        // Unknown codes still mark the upstream as seen so an older row
        // cannot supply stale state.
        seen.insert(upstream.to_string());
    }
    records
}

/// Upstream interface names out of `show cable modem sum`. The `C` prefix
/// is stripped; `truncate_to` bounds the name length (CCAP1 uses 9-char
/// names, CCAP2 keeps the full name).
#[must_use]
pub fn parse_modem_summary_interfaces(output: &str, truncate_to: Option<usize>) -> Vec<String> {
    let mut interfaces = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains('/') {
            continue;
        }
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        let mut interface = first.replace('C', "");
        if let Some(limit) = truncate_to {
            interface.truncate(limit);
        }
        if !interfaces.contains(&interface) {
            interfaces.push(interface);
        }
    }
    interfaces
}

/// CCAP1 fallback path: per-interface hop history; the first modulation row
/// (column 8) wins.
#[must_use]
pub fn parse_ccap1_hop_history(
    device: &str,
    upstream: &str,
    output: &str,
) -> Option<ModulationRecord> {
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("show") || line.contains("Port") {
            continue;
        }
        if !line.contains('M') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= 8 {
            continue;
        }
        if let Some(modulation) = decode_modulation(fields[8]) {
            return Some(ModulationRecord {
                device: device.to_string(),
                upstream: upstream.to_string(),
                modulation,
            });
        }
    }
    None
}

static UPSTREAM_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/U[B\d]+$").expect("static regex"));

/// Collapse `/UB`, `/U0`, `/U1` … variants down to their base interface.
#[must_use]
pub fn base_interfaces(interfaces: &[String]) -> Vec<String> {
    let mut bases = Vec::new();
    for interface in interfaces {
        let base = UPSTREAM_SUFFIX.replace(interface, "").into_owned();
        if !bases.contains(&base) {
            bases.push(base);
        }
    }
    bases
}

static PROFILE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ID (\d+)").expect("static regex"));

/// CCAP2: controller output pairs a `Modulation Profile Group N` (or
/// `Modulation Profile (ID N)`) line with the `Bind ... to USn` lines that
/// follow it. Only traditional DOCSIS upstreams US0–US3 count; OFDMA
/// (`Subcarrier`) profiles are ignored.
#[must_use]
pub fn parse_ccap2_controller(device: &str, base: &str, output: &str) -> Vec<ModulationRecord> {
    let mut records = Vec::new();
    let mut current: Option<Modulation> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("show") {
            continue;
        }

        if line.contains("Modulation Profile Group") && !line.contains("Subcarrier") {
            current = line
                .split("Modulation Profile Group ")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(decode_modulation);
        } else if line.contains("Modulation Profile (ID") && !line.contains("Subcarrier") {
            current = PROFILE_ID
                .captures(line)
                .and_then(|captures| decode_modulation(&captures[1]));
        }

        if line.contains("Bind") && line.contains("to") && !line.contains("US6") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() > 3 {
                let upstream = fields[3].replace("US", "");
                if matches!(upstream.as_str(), "0" | "1" | "2" | "3")
                    && let Some(modulation) = current
                {
                    records.push(ModulationRecord {
                        device: device.to_string(),
                        upstream: format!("{base}/{upstream}"),
                        modulation,
                    });
                }
            }
        }
    }
    records
}
