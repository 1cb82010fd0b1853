use chrono::{Days, NaiveDate};
use regex::{Regex, RegexBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "api_log_";
const FILE_SUFFIX: &str = ".txt";

/// A search match: line index and byte range within that line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default)]
struct SearchState {
    term: String,
    pattern: Option<Regex>,
    last: Option<SearchHit>,
}

/// In-memory copy of the `api.exe` output, mirrored to one file per day.
#[derive(Debug)]
pub struct ApiLog {
    dir: PathBuf,
    date: NaiveDate,
    lines: Vec<String>,
    search: SearchState,
}

pub fn log_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, date.format("%Y-%m-%d"), FILE_SUFFIX)
}

fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete day files dated `retention_days` or more before `today`.
pub fn cleanup_old_logs(dir: &Path, today: NaiveDate, retention_days: u64) -> io::Result<usize> {
    let Some(cutoff) = today.checked_sub_days(Days::new(retention_days)) else {
        return Ok(0);
    };

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        match date_from_file_name(&name) {
            Some(date) if date <= cutoff => {
                fs::remove_file(entry.path())?;
                tracing::info!("Removed old API log {}", name);
                removed += 1;
            }
            _ => {}
        }
    }
    Ok(removed)
}

impl ApiLog {
    /// Creates `dir`, prunes old day files and loads today's file if present.
    pub fn open(dir: &Path, today: NaiveDate, retention_days: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        if let Err(e) = cleanup_old_logs(dir, today, retention_days) {
            tracing::warn!("API log cleanup failed: {}", e);
        }

        let mut log = Self {
            dir: dir.to_path_buf(),
            date: today,
            lines: Vec::new(),
            search: SearchState::default(),
        };

        match fs::read_to_string(log.current_path()) {
            Ok(content) => log.lines = content.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(log)
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(log_file_name(self.date))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        self.lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.search.last = None;
    }

    fn write_current(&self) -> io::Result<()> {
        if self.lines.iter().all(|l| l.trim().is_empty()) {
            return Ok(());
        }
        let mut content = self.lines.join("\n");
        content.push('\n');
        fs::write(self.current_path(), content)
    }

    /// Write the buffer to the current day file. When the date has changed the
    /// buffer goes to the old day's file and then starts empty for `today`.
    pub fn autosave(&mut self, today: NaiveDate) -> io::Result<()> {
        self.write_current()?;
        if today != self.date {
            tracing::info!("API log rolled over to {}", today);
            self.date = today;
            self.clear();
        }
        Ok(())
    }

    /// Next case-insensitive match after the previous one, wrapping to the top.
    /// A different `term` restarts from the first line.
    pub fn search_next(&mut self, term: &str) -> Option<SearchHit> {
        if term != self.search.term {
            self.search.term = term.to_string();
            self.search.last = None;
            self.search.pattern = if term.is_empty() {
                None
            } else {
                RegexBuilder::new(&regex::escape(term))
                    .case_insensitive(true)
                    .build()
                    .ok()
            };
        }
        let pattern = self.search.pattern.as_ref()?;

        let from = self.search.last.map(|hit| (hit.line, hit.end)).unwrap_or((0, 0));
        let hit = find_from(&self.lines, pattern, from).or_else(|| find_from(&self.lines, pattern, (0, 0)));
        self.search.last = hit;
        hit
    }

    pub fn last_hit(&self) -> Option<SearchHit> {
        self.search.last
    }
}

fn find_from(lines: &[String], pattern: &Regex, (line, offset): (usize, usize)) -> Option<SearchHit> {
    lines.iter().enumerate().skip(line).find_map(|(index, text)| {
        let start = if index == line { offset } else { 0 };
        if start > text.len() {
            return None;
        }
        pattern.find_at(text, start).map(|m| SearchHit {
            line: index,
            start: m.start(),
            end: m.end(),
        })
    })
}
