// Access verification against the HR roster


use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error};

/// One roster row; columns other than these two are ignored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterEntry {
    pub full_name: String,
    pub department: String,
}

/// The list of people and the department each belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Read a roster CSV with `full_name` and `department` columns
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open roster: {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to parse roster: {}", path.display()))
    }

    #[inline]
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let entries = csv_reader
            .deserialize()
            .collect::<std::result::Result<Vec<RosterEntry>, _>>()
            .context("Invalid roster row")?;

        debug!("Loaded roster with {} entries", entries.len());
        Ok(Self { entries })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether some row matches both fields after trimming and lowercasing
    #[inline]
    pub fn contains(&self, name: &str, department: &str) -> bool {
        let name = normalize(name);
        let department = normalize(department);
        self.entries
            .iter()
            .any(|entry| normalize(&entry.full_name) == name && normalize(&entry.department) == department)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Check `name` and `department` against the roster at `roster_path`
#[inline]
pub fn check_access<P: AsRef<Path>>(roster_path: P, name: &str, department: &str) -> Result<bool> {
    Ok(Roster::load(roster_path)?.contains(name, department))
}

/// Like [`check_access`], but a roster that cannot be read counts as a denial
///
/// # Arguments
///
/// * `roster_path` - Employee roster CSV with `full_name` and `department` columns
/// * `name` - Employee name, matched trimmed and case-insensitively
/// * `department` - Department, matched trimmed and case-insensitively
///
/// # Returns
///
/// `true` only when the roster was read and lists the pair
#[inline]
pub fn verify_user<P: AsRef<Path>>(roster_path: P, name: &str, department: &str) -> bool {
    match check_access(roster_path, name, department) {
        Ok(allowed) => allowed,
        Err(e) => {
            error!("Authentication error: {:#}", e);
            false
        }
    }
}
