// JSON import/export of flat field maps and dependency graphs

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde_json::Value;

use twinstate_engine::graph_export::GraphExport;

/// Read a flat `{ "id": value }` object. Scalars are converted to the text
/// form the engine parses on import; `null` becomes an empty entry.
pub fn import(path: &Path) -> Result<BTreeMap<String, String>, String> {
    let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let value: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;
    flat_map_from_value(value)
}

pub fn import_from_str(content: &str) -> Result<BTreeMap<String, String>, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    flat_map_from_value(value)
}

fn flat_map_from_value(value: Value) -> Result<BTreeMap<String, String>, String> {
    let Value::Object(object) = value else {
        return Err("expected a JSON object of field ids".to_string());
    };

    let mut entries = BTreeMap::new();
    for (id, value) in object {
        let text = match value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s,
            Value::Array(_) | Value::Object(_) => {
                return Err(format!("field '{}' must be a scalar", id));
            }
        };
        entries.insert(id, text);
    }
    Ok(entries)
}

/// Write a flat map as a pretty-printed JSON object (keys sorted)
pub fn export(entries: &BTreeMap<String, String>, path: &Path) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, entries).map_err(|e| e.to_string())?;
    Ok(())
}

pub fn export_graph(graph: &GraphExport, path: &Path) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, graph).map_err(|e| e.to_string())?;
    Ok(())
}
