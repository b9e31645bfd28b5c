use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

/// Venue layout loaded at startup: areas and the tables in each.
///
/// ```json
/// {"areas": [{"id": "main", "name": "Main Hall", "maxTables": 10,
///             "tables": [{"id": "main_1", "type": "standard", "capacity": 4}]}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedFile {
    pub areas: Vec<SeedArea>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedArea {
    pub id: String,
    pub name: String,
    #[serde(rename = "maxTables")]
    pub max_tables: u32,
    #[serde(default)]
    pub tables: Vec<SeedTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedTable {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub capacity: u32,
}

impl SeedFile {
    pub fn from_json(text: &str) -> io::Result<Self> {
        serde_json::from_str(text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
