use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BanFileError {
    #[error("ban file: {0}")]
    Io(#[from] io::Error),
    #[error("ban file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ban file has a bad pattern '{0}'")]
    Pattern(String),
}

/// How a ban is written to the ban file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BanRecord {
    pattern: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    expires: i64,
}

/// One banned address pattern. Octets written as `*` match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    octets: [Option<u8>; 4],
    pub reason: String,
    /// Unix seconds; 0 never expires.
    pub expires: i64,
}

impl BanEntry {
    /// Parses `a.b.c.d` where each part is a number or `*`.
    pub fn parse(pattern: &str, reason: &str, expires: i64) -> Option<Self> {
        let mut octets = [None; 4];
        let mut parts = pattern.trim().split('.');
        for octet in &mut octets {
            let part = parts.next()?;
            *octet = match part {
                "*" => None,
                number => Some(number.parse().ok()?),
            };
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            octets,
            reason: reason.to_string(),
            expires,
        })
    }

    pub fn pattern(&self) -> String {
        self.octets
            .iter()
            .map(|o| o.map_or_else(|| "*".to_string(), |o| o.to_string()))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        let v4 = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };
        self.octets
            .iter()
            .zip(v4.octets())
            .all(|(pattern, octet)| pattern.is_none_or(|p| p == octet))
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires != 0 && self.expires <= now
    }
}

#[derive(Debug, Clone, Default)]
pub struct BanList {
    entries: Vec<BanEntry>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a ban, replacing an existing one with the same pattern.
    pub fn add(&mut self, entry: BanEntry) {
        let pattern = entry.pattern();
        self.entries.retain(|e| e.pattern() != pattern);
        self.entries.push(entry);
    }

    pub fn remove(&mut self, pattern: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.pattern() != pattern);
        self.entries.len() != before
    }

    /// The ban covering `ip` at `now`, if any.
    pub fn find(&self, ip: IpAddr, now: i64) -> Option<&BanEntry> {
        self.entries
            .iter()
            .find(|e| !e.is_expired(now) && e.matches(ip))
    }

    /// Drops expired entries and returns how many went.
    pub fn prune(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_expired(now));
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[BanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a ban file. A missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self, BanFileError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<BanRecord> = serde_json::from_str(&text)?;
        let mut bans = Self::new();
        for record in records {
            let entry = BanEntry::parse(&record.pattern, &record.reason, record.expires)
                .ok_or(BanFileError::Pattern(record.pattern))?;
            bans.add(entry);
        }
        Ok(bans)
    }

    pub fn save(&self, path: &Path) -> Result<(), BanFileError> {
        let records: Vec<BanRecord> = self
            .entries
            .iter()
            .map(|e| BanRecord {
                pattern: e.pattern(),
                reason: e.reason.clone(),
                expires: e.expires,
            })
            .collect();
        fs::write(path, serde_json::to_string_pretty(&records)?)?;
        Ok(())
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
