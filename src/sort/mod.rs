//! Copies or moves photos into a dated layout under a target directory.
//!
//! Each source file is named with a [`NameFormatter`]: the dated pattern if
//! the file carries an EXIF capture time, the undated one otherwise. Name
//! collisions are resolved by appending `-1`, `-2`, ... to the stem; an
//! existing file with identical bytes counts as a duplicate and is left
//! alone.

pub mod naming;
mod stats;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rayon::prelude::*;

pub use naming::{DEFAULT_FILE_PATTERN, DEFAULT_UNDATED_PATTERN, NameFormatter};
pub use stats::SortStats;

use crate::cursor::{CancelToken, CursorOptions, DirCursor, FileFilter, FsLister};
use crate::error::{Error, Result};
use crate::exif::TimestampReader;
use crate::time_index::Zone;

#[derive(Debug, Clone)]
pub struct SortConfig {
    pub source: PathBuf,
    pub target: PathBuf,
    pub move_files: bool,
    pub dry_run: bool,
    pub pattern: String,
    pub undated_pattern: String,
    pub zone: Zone,
}

impl SortConfig {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        SortConfig {
            source: source.into(),
            target: target.into(),
            move_files: false,
            dry_run: false,
            pattern: DEFAULT_FILE_PATTERN.to_string(),
            undated_pattern: DEFAULT_UNDATED_PATTERN.to_string(),
            zone: Zone::default(),
        }
    }
}

/// What happened to one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Copied(PathBuf),
    Moved(PathBuf),
    /// An identical file already exists at this path.
    Duplicate(PathBuf),
    Failed(String),
}

/// Progress notifications from [`Sorter::run`]. May arrive from several
/// threads while timestamps are being read.
#[derive(Debug)]
pub enum SortEvent<'a> {
    Located { files: usize },
    Scanned { source: &'a Path },
    Sorted { source: &'a Path, outcome: &'a Outcome },
}

pub struct Sorter {
    config: SortConfig,
    formatter: NameFormatter,
    undated: NameFormatter,
    reader: TimestampReader,
}

impl Sorter {
    pub fn new(config: SortConfig) -> Result<Self> {
        let formatter = NameFormatter::compile(&config.pattern)?;
        let undated = NameFormatter::compile(&config.undated_pattern)?;
        if undated.needs_timestamp() {
            return Err(Error::Pattern(format!(
                "undated pattern '{}' cannot use %d",
                config.undated_pattern
            )));
        }
        let reader = TimestampReader::new(config.zone);
        Ok(Sorter {
            config,
            formatter,
            undated,
            reader,
        })
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Lists the visible files under the source, or the source itself if it
    /// is a file.
    pub fn find_input_files(&self, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
        let source = &self.config.source;
        if source.is_file() {
            let visible = source
                .file_name()
                .is_some_and(|n| FileFilter::Visible.accepts(&n.to_string_lossy()));
            return Ok(if visible { vec![source.clone()] } else { Vec::new() });
        }

        let options = CursorOptions::new().file_filter(FileFilter::Visible);
        let mut cursor = DirCursor::with_options(source, options, FsLister)?;
        let mut files = Vec::new();
        while let Some(entry) = cursor.next_entry_cancellable(cancel)? {
            files.push(entry.path);
        }
        Ok(files)
    }

    /// Sorts every input file. Per-file failures are counted, never fatal.
    /// Cancellation stops between files and returns the counts so far with
    /// `interrupted` set.
    pub fn run<F>(&self, cancel: &CancelToken, progress: F) -> Result<SortStats>
    where
        F: Fn(SortEvent<'_>) + Sync,
    {
        let mut stats = SortStats::default();
        let files = match self.find_input_files(cancel) {
            Ok(files) => files,
            Err(Error::Interrupted) => {
                stats.interrupted = true;
                return Ok(stats);
            }
            Err(e) => return Err(e),
        };
        stats.files = files.len();
        progress(SortEvent::Located { files: files.len() });
        log::info!("Found {} files in {}", files.len(), self.config.source.display());

        let timestamps: Vec<Result<Option<i64>>> = files
            .par_iter()
            .map(|file| {
                if cancel.is_cancelled() {
                    return Err(Error::Interrupted);
                }
                let micros = self.reader.read_file(file);
                progress(SortEvent::Scanned { source: file });
                micros
            })
            .collect();

        let mut planned = HashSet::new();
        for (source, micros) in files.iter().zip(timestamps) {
            if cancel.is_cancelled() {
                stats.interrupted = true;
                break;
            }

            let outcome = match micros {
                Ok(micros) => {
                    let taken = micros
                        .and_then(|m| self.config.zone.snapshot(m))
                        .map(|s| s.datetime);
                    let outcome = self.sort_file(source, taken.as_ref(), &mut planned);
                    if taken.is_none() && matches!(outcome, Outcome::Copied(_) | Outcome::Moved(_)) {
                        stats.undated += 1;
                    }
                    outcome
                }
                Err(Error::Interrupted) => {
                    stats.interrupted = true;
                    break;
                }
                Err(e) => Outcome::Failed(e.to_string()),
            };

            match &outcome {
                Outcome::Copied(target) => {
                    stats.copied += 1;
                    log::debug!("{} c> {}", source.display(), target.display());
                }
                Outcome::Moved(target) => {
                    stats.moved += 1;
                    log::debug!("{} m> {}", source.display(), target.display());
                }
                Outcome::Duplicate(existing) => {
                    stats.duplicates += 1;
                    log::debug!("{} == {}", source.display(), existing.display());
                }
                Outcome::Failed(reason) => {
                    stats.failed += 1;
                    log::warn!("Failed to sort \"{}\": {}", source.display(), reason);
                }
            }
            progress(SortEvent::Sorted {
                source,
                outcome: &outcome,
            });
        }

        Ok(stats)
    }

    fn sort_file(
        &self,
        source: &Path,
        taken: Option<&NaiveDateTime>,
        planned: &mut HashSet<PathBuf>,
    ) -> Outcome {
        let relative = match taken {
            Some(taken) => self.formatter.format(source, Some(taken)),
            None => self.undated.format(source, None),
        };

        let named = self.config.target.join(relative);
        let (Some(dir), Some(name)) = (named.parent(), named.file_name()) else {
            return Outcome::Failed(format!("pattern produced no file name: {}", named.display()));
        };
        let (stem, ext) = split_name(&name.to_string_lossy());

        let mut target = None;
        for candidate in numbered_names(dir, &stem, &ext) {
            if planned.contains(&candidate) {
                continue;
            }
            if !candidate.exists() {
                target = Some(candidate);
                break;
            }
            match same_contents(source, &candidate) {
                Ok(true) => return Outcome::Duplicate(candidate),
                Ok(false) => {}
                Err(e) => return Outcome::Failed(e.to_string()),
            }
        }
        let Some(target) = target else {
            return Outcome::Failed("no free file name".to_string());
        };

        if self.config.dry_run {
            log::info!(
                "Would {} {} to {}",
                if self.config.move_files { "move" } else { "copy" },
                source.display(),
                target.display()
            );
            planned.insert(target.clone());
            return if self.config.move_files {
                Outcome::Moved(target)
            } else {
                Outcome::Copied(target)
            };
        }

        match transfer(source, &target, self.config.move_files) {
            Ok(()) if self.config.move_files => Outcome::Moved(target),
            Ok(()) => Outcome::Copied(target),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

/// Splits a file name into stem and lowercased extension. `.jpeg` becomes
/// `.jpg`, and a name without extension is treated as a JPEG.
fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(i) => {
            let ext = name[i..].to_lowercase();
            let ext = if ext == ".jpeg" { ".jpg".to_string() } else { ext };
            (name[..i].to_string(), ext)
        }
        None => (name.to_string(), ".jpg".to_string()),
    }
}

/// `stem.ext`, `stem-1.ext`, `stem-2.ext`, ...
fn numbered_names<'a>(dir: &'a Path, stem: &'a str, ext: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    (0..u32::MAX).map(move |n| match n {
        0 => dir.join(format!("{stem}{ext}")),
        n => dir.join(format!("{stem}-{n}{ext}")),
    })
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

fn transfer(source: &Path, target: &Path, move_file: bool) -> io::Result<()> {
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }
    if !move_file {
        return fs::copy(source, target).map(|_| ());
    }
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    // Renames fail across filesystems.
    fs::copy(source, target)?;
    fs::remove_file(source)
}
