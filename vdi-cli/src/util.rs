// SPDX-License-Identifier: MIT

pub fn pretty_bytes(n: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut val = n as f64;
    let mut idx = 0usize;
    while val >= 1024.0 && idx + 1 < UNITS.len() {
        val /= 1024.0;
        idx += 1;
    }
    if idx == 0 {
        format!("{n} {}", UNITS[idx])
    } else {
        format!("{val:.1} {}", UNITS[idx])
    }
}

/// Parses a size like `"2M"`, `"512k"`, `"1g"` or a bare byte count.
pub fn parse_size(s: &str) -> anyhow::Result<u64> {
    let lower = s.trim().to_lowercase();
    if let Some(num) = lower.strip_suffix("g") {
        Ok(num.trim().parse::<u64>()? * 1024 * 1024 * 1024)
    } else if let Some(num) = lower.strip_suffix("m") {
        Ok(num.trim().parse::<u64>()? * 1024 * 1024)
    } else if let Some(num) = lower.strip_suffix("k") {
        Ok(num.trim().parse::<u64>()? * 1024)
    } else {
        Ok(lower.parse::<u64>()?)
    }
}

pub fn parse_uuid(s: &str) -> anyhow::Result<[u8; 16]> {
    Ok(*uuid::Uuid::parse_str(s)?.as_bytes())
}
