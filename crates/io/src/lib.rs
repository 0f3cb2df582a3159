// File I/O: snapshot backends and flat-map import/export

use std::collections::BTreeMap;
use std::path::Path;

pub mod csv;
pub mod json;
pub mod json_dir;
pub mod sqlite;

pub use json_dir::JsonDirBackend;
pub use sqlite::SqliteBackend;

/// Snapshot storage format version
/// Increment when the schema changes in a way older versions can't read
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Flat-map file formats, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatFormat {
    Json,
    Csv,
    Tsv,
}

impl FlatFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(FlatFormat::Json),
            "csv" | "txt" => Some(FlatFormat::Csv),
            "tsv" | "tab" => Some(FlatFormat::Tsv),
            _ => None,
        }
    }
}

/// Read a flat id -> text map from `path`, format picked by extension
pub fn read_flat_map(path: &Path) -> Result<BTreeMap<String, String>, String> {
    match FlatFormat::from_path(path) {
        Some(FlatFormat::Json) => json::import(path),
        Some(FlatFormat::Csv) => crate::csv::import(path),
        Some(FlatFormat::Tsv) => crate::csv::import_tsv(path),
        None => Err(format!("unsupported file type: {}", path.display())),
    }
}

/// Write a flat id -> text map to `path`, format picked by extension
pub fn write_flat_map(entries: &BTreeMap<String, String>, path: &Path) -> Result<(), String> {
    match FlatFormat::from_path(path) {
        Some(FlatFormat::Json) => json::export(entries, path),
        Some(FlatFormat::Csv) => crate::csv::export(entries, path),
        Some(FlatFormat::Tsv) => crate::csv::export_tsv(entries, path),
        None => Err(format!("unsupported file type: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FlatFormat::from_path(Path::new("a.JSON")), Some(FlatFormat::Json));
        assert_eq!(FlatFormat::from_path(Path::new("a.csv")), Some(FlatFormat::Csv));
        assert_eq!(FlatFormat::from_path(Path::new("a.tsv")), Some(FlatFormat::Tsv));
        assert_eq!(FlatFormat::from_path(Path::new("a.xlsx")), None);
        assert_eq!(FlatFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_flat_map_roundtrip_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("area".to_string(), "100".to_string());
        entries.insert("ref_area".to_string(), "50".to_string());

        for name in ["fields.json", "fields.csv", "fields.tsv"] {
            let path = dir.path().join(name);
            write_flat_map(&entries, &path).unwrap();
            assert_eq!(read_flat_map(&path).unwrap(), entries, "{name}");
        }
        assert!(write_flat_map(&entries, &dir.path().join("fields.xlsx")).is_err());
    }
}
