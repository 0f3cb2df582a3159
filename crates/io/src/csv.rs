// CSV/TSV import/export of flat field maps
// Two columns: field id, value. An optional `id,value` header row is skipped.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

pub fn import(path: &Path) -> Result<BTreeMap<String, String>, String> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    import_from_string(&content, delimiter)
}

pub fn import_tsv(path: &Path) -> Result<BTreeMap<String, String>, String> {
    let content = read_file_as_utf8(path)?;
    import_from_string(&content, b'\t')
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Must produce >1 field on the first line to be viable
        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Score: (number of lines with same field count as line 1) * field_count
        // Higher field count breaks ties
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    // Try UTF-8 first; on failure, recover the buffer from the error
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            // Fall back to Windows-1252 (common for Excel-exported CSVs)
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

fn is_header(record: &csv::StringRecord) -> bool {
    matches!(
        record.get(0).map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("id" | "field" | "field_id")
    )
}

pub fn import_from_string(content: &str, delimiter: u8) -> Result<BTreeMap<String, String>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut entries = BTreeMap::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| e.to_string())?;
        if row_idx == 0 && is_header(&record) {
            continue;
        }
        let id = record.get(0).map(str::trim).unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        if record.len() > 2 {
            return Err(format!("row {}: expected 2 columns, found {}", row_idx + 1, record.len()));
        }
        let value = record.get(1).unwrap_or_default();
        entries.insert(id.to_string(), value.to_string());
    }

    Ok(entries)
}

pub fn export(entries: &BTreeMap<String, String>, path: &Path) -> Result<(), String> {
    export_with_delimiter(entries, path, b',')
}

pub fn export_tsv(entries: &BTreeMap<String, String>, path: &Path) -> Result<(), String> {
    export_with_delimiter(entries, path, b'\t')
}

fn export_with_delimiter(entries: &BTreeMap<String, String>, path: &Path, delimiter: u8) -> Result<(), String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| e.to_string())?;

    writer.write_record(["id", "value"]).map_err(|e| e.to_string())?;
    for (id, value) in entries {
        writer.write_record([id, value]).map_err(|e| e.to_string())?;
    }

    writer.flush().map_err(|e| e.to_string())?;
    Ok(())
}
