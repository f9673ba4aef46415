//! Parses DOS `DIR` output and caches it keyed by DOS directory argument.

use std::collections::HashMap;

use chrono::NaiveDate;

const HEADER_LINES: usize = 5;
const TRAILER_LINES: usize = 3;

/// One parsed `DIR` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub date: NaiveDate,
}

fn column(line: &str, start: usize, end_exclusive: usize) -> String {
    let chars: Vec<char> = line.chars().collect();
    let end = end_exclusive.min(chars.len());
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect::<String>().trim().to_string()
}

fn parse_line(line: &str) -> Option<DirEntry> {
    let name_field = column(line, 0, 8);
    let ext_field = column(line, 9, 12);
    let size_field = column(line, 13, 26);
    let date_field = column(line, 26, 36);

    if name_field.is_empty() {
        return None;
    }

    let name = if ext_field.is_empty() {
        name_field
    } else {
        format!("{name_field}.{ext_field}")
    }
    .to_lowercase();

    if name == "." || name == ".." {
        return None;
    }

    let is_dir = size_field == "<DIR>";
    let size: u64 = if is_dir {
        0
    } else {
        size_field.replace(',', "").parse().ok()?
    };

    let date = NaiveDate::parse_from_str(date_field.trim(), "%m-%d-%y").ok()?;

    Some(DirEntry {
        name,
        is_dir,
        size,
        date,
    })
}

/// Parse a full `DIR` capture. Returns `None` when the device reports the
/// directory/drive doesn't exist ("File not found" / "Invalid drive") —
/// distinct from `Some(vec![])`, an existing but empty directory.
pub fn parse_listing(capture: &str) -> Option<Vec<DirEntry>> {
    if capture.contains("File not found") || capture.contains("Invalid drive") {
        return None;
    }

    let lines: Vec<&str> = capture.lines().collect();
    if lines.len() <= HEADER_LINES + TRAILER_LINES {
        return Some(Vec::new());
    }

    let body = &lines[HEADER_LINES..lines.len() - TRAILER_LINES];
    Some(body.iter().filter_map(|l| parse_line(l)).collect())
}

/// Memoizes `DIR` results keyed by the DOS directory argument string
/// (e.g. `c:\foo`). Absent listings are never cached.
#[derive(Default)]
pub struct ListingCache {
    entries: HashMap<String, Vec<DirEntry>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dos_dir_arg: &str) -> Option<&[DirEntry]> {
        self.entries.get(dos_dir_arg).map(Vec::as_slice)
    }

    pub fn insert(&mut self, dos_dir_arg: String, entries: Vec<DirEntry>) {
        self.entries.insert(dos_dir_arg, entries);
    }

    pub fn invalidate(&mut self, dos_dir_arg: &str) {
        self.entries.remove(dos_dir_arg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_capture() -> String {
        [
            " Volume in drive C is DOS",
            " Volume Serial Number is 1234-5678",
            "",
            " Directory of C:\\",
            "",
            "README   TXT        1,234  01-02-26",
            "SUBDIR       <DIR>         03-04-26",
            ".            <DIR>         03-04-26",
            "..           <DIR>         03-04-26",
            "        2 file(s)          1,234 bytes",
            "        1 dir(s)     123,456 bytes free",
            "",
        ]
        .join("\n")
    }

    #[test]
    fn parses_file_and_dir_entries() {
        let entries = parse_listing(&sample_capture()).unwrap();
        assert_eq!(entries.len(), 2);

        let file = &entries[0];
        assert_eq!(file.name, "readme.txt");
        assert!(!file.is_dir);
        assert_eq!(file.size, 1234);
        assert_eq!(file.date.format("%m-%d-%y").to_string(), "01-02-26");

        let dir = &entries[1];
        assert_eq!(dir.name, "subdir");
        assert!(dir.is_dir);
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn elides_dot_entries() {
        let entries = parse_listing(&sample_capture()).unwrap();
        assert!(!entries.iter().any(|e| e.name == "." || e.name == ".."));
    }

    #[test]
    fn absent_on_file_not_found() {
        assert!(parse_listing("File not found\n").is_none());
    }

    #[test]
    fn absent_on_invalid_drive() {
        assert!(parse_listing("Invalid drive specification\n").is_none());
    }

    #[test]
    fn cache_round_trip_and_invalidation() {
        let mut cache = ListingCache::new();
        assert!(cache.get("c:\\").is_none());
        cache.insert("c:\\".to_string(), vec![]);
        assert!(cache.get("c:\\").is_some());
        cache.invalidate("c:\\");
        assert!(cache.get("c:\\").is_none());
    }
}
