use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

use crate::entity::{EntityRecord, Phenotype};

/// Records read from a text source, plus the number of lines that could not be
/// parsed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordLoad {
    pub records: Vec<EntityRecord>,
    pub skipped: usize,
}

fn parse_invasive(field: &str) -> Option<bool> {
    match field {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Parse one `phenotype invasive site x y` line. Extra trailing fields are
/// ignored.
pub fn parse_record(line: &str) -> Option<EntityRecord> {
    let mut fields = line.split_whitespace();
    let phenotype: Phenotype = fields.next()?.parse().ok()?;
    let invasive = parse_invasive(fields.next()?)?;
    let site: usize = fields.next()?.parse().ok()?;
    let x: f64 = fields.next()?.parse().ok()?;
    let y: f64 = fields.next()?.parse().ok()?;
    Some(EntityRecord {
        phenotype,
        invasive,
        site,
        x,
        y,
    })
}

/// Read records line by line. Blank lines and `#` comments are ignored;
/// malformed lines are skipped and counted, never fatal.
pub fn read_records(reader: impl BufRead) -> Result<RecordLoad> {
    let mut load = RecordLoad::default();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading record line {}", lineno + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_record(trimmed) {
            Some(record) => load.records.push(record),
            None => {
                warn!(line = lineno + 1, content = trimmed, "skipping malformed record");
                load.skipped += 1;
            }
        }
    }
    Ok(load)
}

pub fn load_records(path: &Path) -> Result<RecordLoad> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let load = read_records(BufReader::new(file))?;
    info!(
        path = %path.display(),
        records = load.records.len(),
        skipped = load.skipped,
        "loaded initial population records"
    );
    Ok(load)
}
