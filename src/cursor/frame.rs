use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use super::CursorOptions;
use super::listing::Lister;
use crate::time_block::TimeBlock;
use crate::time_index::{TimeLevel, child_span, parse_directory_index, zeroed_base};

/// A file or directory inside a listed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub path: PathBuf,
    /// Directory index parsed from the name; always `None` for files.
    pub index: Option<i64>,
}

/// Where a directory sits in the time hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub level: TimeLevel,
    pub span: TimeBlock,
    /// Wall-clock start of `span`; children derive their spans from it.
    pub base: NaiveDateTime,
}

impl Placement {
    pub fn root() -> Self {
        Placement {
            level: TimeLevel::All,
            span: TimeBlock::UNBOUNDED,
            base: zeroed_base(),
        }
    }

    /// Placement of a child directory with the given index. Children of
    /// non-indexed directories, and children without a valid index, stay
    /// outside the hierarchy and inherit this span.
    pub fn child(&self, options: &CursorOptions, index: Option<i64>) -> Placement {
        let level = self.level.next();
        match index.and_then(|i| child_span(options.zone, &self.base, level, i)) {
            Some((base, span)) => Placement { level, span, base },
            None => Placement {
                level: TimeLevel::None,
                ..*self
            },
        }
    }
}

/// One listed directory on the cursor stack.
///
/// `pos` is a gap in the sequence `files ++ dirs`: a forward step yields the
/// entry right after it, a backward step the entry right before it. While a
/// subdirectory is pushed above this frame, `open` holds its index and `pos`
/// is recomputed when the child is popped.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub dir: PathBuf,
    pub files: Vec<Entry>,
    pub dirs: Vec<Entry>,
    pub pos: usize,
    pub open: Option<usize>,
    pub place: Placement,
}

impl Frame {
    pub fn open<L: Lister>(
        lister: &L,
        options: &CursorOptions,
        dir: &Path,
        place: Placement,
    ) -> Frame {
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        for listed in lister.list(dir) {
            let name = listed.name.to_string_lossy().into_owned();
            if listed.is_dir {
                if options.dir_filter.accepts(&name) {
                    let index = parse_directory_index(&name);
                    dirs.push((listed.name, name, index));
                }
            } else if options.file_filter.accepts(&name) {
                files.push((listed.name, name, None));
            }
        }

        files.sort_by(|a, b| options.file_order.compare((a.1.as_str(), a.2), (b.1.as_str(), b.2)));
        dirs.sort_by(|a, b| options.dir_order.compare((a.1.as_str(), a.2), (b.1.as_str(), b.2)));

        let entries = |list: Vec<(OsString, String, Option<i64>)>| -> Vec<Entry> {
            list.into_iter()
                .map(|(name, _, index)| Entry {
                    path: dir.join(name),
                    index,
                })
                .collect()
        };

        Frame {
            dir: dir.to_path_buf(),
            files: entries(files),
            dirs: entries(dirs),
            pos: 0,
            open: None,
            place,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    pub fn span(&self) -> TimeBlock {
        self.place.span
    }

    pub fn level(&self) -> TimeLevel {
        self.place.level
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
        self.open = None;
    }

    pub fn wind(&mut self) {
        self.pos = self.len();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::listing::Listed;

    struct Fixed(Vec<(&'static str, bool)>);

    impl Lister for Fixed {
        fn list(&self, _dir: &Path) -> Vec<Listed> {
            self.0
                .iter()
                .map(|(name, is_dir)| Listed {
                    name: OsString::from(name),
                    is_dir: *is_dir,
                })
                .collect()
        }
    }

    #[test]
    fn open_splits_filters_and_sorts() {
        let lister = Fixed(vec![
            ("b.jpg", false),
            (".hidden", false),
            ("A.jpg", false),
            ("misc", true),
            ("10", true),
            ("9", true),
        ]);
        let frame = Frame::open(
            &lister,
            &CursorOptions::new(),
            Path::new("/r"),
            Placement::root(),
        );

        let files: Vec<_> = frame.files.iter().map(|e| e.path.clone()).collect();
        assert_eq!(files, vec![PathBuf::from("/r/A.jpg"), PathBuf::from("/r/b.jpg")]);

        let dirs: Vec<_> = frame.dirs.iter().map(|e| e.index).collect();
        assert_eq!(dirs, vec![Some(9), Some(10), None]);
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn non_indexed_children_inherit() {
        let options = CursorOptions::default();
        let root = Placement::root();
        let year = root.child(&options, Some(2020));
        assert_eq!(year.level, TimeLevel::Year);

        let misc = year.child(&options, None);
        assert_eq!(misc.level, TimeLevel::None);
        assert_eq!(misc.span, year.span);

        let below = misc.child(&options, Some(1));
        assert_eq!(below.level, TimeLevel::None);
        assert_eq!(below.span, year.span);
    }
}
