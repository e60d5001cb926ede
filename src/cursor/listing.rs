use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub name: OsString,
    pub is_dir: bool,
}

/// Source of directory listings for a cursor.
///
/// A directory that cannot be read lists as empty; the cursor treats that the
/// same as a directory with no entries.
pub trait Lister {
    fn list(&self, dir: &Path) -> Vec<Listed>;
}

/// Lists the real filesystem. Symbolic links are followed when deciding
/// whether an entry is a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLister;

impl Lister for FsLister {
    fn list(&self, dir: &Path) -> Vec<Listed> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("cannot list {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        entries
            .flatten()
            .map(|entry| Listed {
                is_dir: entry.path().is_dir(),
                name: entry.file_name(),
            })
            .collect()
    }
}

/// Sort order for the entries of one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryOrder {
    /// Case-insensitive by name.
    #[default]
    Alphabetical,
    /// Indexed names by ascending index, then everything else
    /// alphabetically. Time seeks rely on this order for directories.
    DirectoryIndex,
}

impl EntryOrder {
    pub fn compare(
        self,
        (a_name, a_index): (&str, Option<i64>),
        (b_name, b_index): (&str, Option<i64>),
    ) -> Ordering {
        let alpha = || {
            a_name
                .to_lowercase()
                .cmp(&b_name.to_lowercase())
                .then_with(|| a_name.cmp(b_name))
        };
        match self {
            EntryOrder::Alphabetical => alpha(),
            EntryOrder::DirectoryIndex => match (a_index, b_index) {
                (Some(a), Some(b)) => a.cmp(&b).then_with(alpha),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => alpha(),
            },
        }
    }
}
