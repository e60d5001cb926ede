//! A resumable, bidirectional cursor over a directory tree.
//!
//! The cursor always points at a gap between two files. `next_entry`
//! returns the file after the gap and `previous_entry` the file before it.
//! Files in a directory come before its subdirectories when moving forward;
//! the order reverses when moving backward.
//!
//! Trees laid out as `YYYY/NN_month/NN_day/HH/MM/` (see [`crate::time_index`])
//! get extra support: every returned file carries the time span of its
//! directory, whole subtrees can be skipped with a time range, and the cursor
//! can seek to a timestamp.
//!
//! Seeks are lazy. `reset`, `goto_*` only record what to do; the work happens
//! on the next retrieval, which is also the only place cancellation is
//! observed. A cancelled retrieval leaves the cursor exactly as it was.

mod filter;
mod frame;
mod listing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use filter::{DataFormat, DirFilter, FileFilter, is_hidden, is_jpeg_file, parse_channel};
pub use listing::{EntryOrder, FsLister, Listed, Lister};

use frame::{Frame, Placement};

use crate::error::{Error, Result};
use crate::time_block::TimeBlock;
use crate::time_index::{TimeLevel, Zone, directory_index};

/// Cooperative cancellation flag shared between a cursor's caller and
/// whoever wants to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    None,
    Forward,
    Backward,
}

/// The action a cursor performs before its next retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    Reset,
    GotoEnd,
    GotoCurrent,
    GotoFileStart(PathBuf),
    GotoFileEnd(PathBuf),
    GotoTime(i64),
    Ready,
}

/// A file returned by the cursor along with the span of its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEntry {
    pub path: PathBuf,
    pub span: TimeBlock,
}

#[derive(Debug, Clone)]
pub struct CursorOptions {
    pub file_filter: FileFilter,
    pub file_order: EntryOrder,
    pub dir_filter: DirFilter,
    pub dir_order: EntryOrder,
    pub zone: Zone,
}

impl CursorOptions {
    /// Visible files in alphabetical order, directories by index.
    pub fn new() -> Self {
        CursorOptions {
            file_filter: FileFilter::default(),
            file_order: EntryOrder::Alphabetical,
            dir_filter: DirFilter::default(),
            dir_order: EntryOrder::DirectoryIndex,
            zone: Zone::default(),
        }
    }

    pub fn file_filter(mut self, filter: FileFilter) -> Self {
        self.file_filter = filter;
        self
    }

    pub fn dir_filter(mut self, filter: DirFilter) -> Self {
        self.dir_filter = filter;
        self
    }

    pub fn file_order(mut self, order: EntryOrder) -> Self {
        self.file_order = order;
        self
    }

    pub fn dir_order(mut self, order: EntryOrder) -> Self {
        self.dir_order = order;
        self
    }

    pub fn zone(mut self, zone: Zone) -> Self {
        self.zone = zone;
        self
    }
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// State needed to undo a retrieval.
enum Checkpoint {
    /// Copy of the whole stack, taken when the retrieval starts with a seek.
    Full(Vec<Frame>),
    /// Positions of the frames present when the retrieval started, plus the
    /// ones it popped, top first.
    Positions {
        marks: Vec<(usize, Option<usize>)>,
        popped: Vec<Frame>,
    },
}

impl Checkpoint {
    fn positions(stack: &[Frame]) -> Self {
        Checkpoint::Positions {
            marks: stack.iter().map(|f| (f.pos, f.open)).collect(),
            popped: Vec::new(),
        }
    }

    /// Called after `frame` was popped, leaving `depth` frames below it.
    fn record_pop(&mut self, frame: Frame, depth: usize) {
        if let Checkpoint::Positions { marks, popped } = self {
            if depth < marks.len() - popped.len() {
                popped.push(frame);
            }
        }
    }

    fn restore(self, stack: &mut Vec<Frame>) {
        match self {
            Checkpoint::Full(saved) => *stack = saved,
            Checkpoint::Positions { marks, popped } => {
                stack.truncate(marks.len() - popped.len());
                stack.extend(popped.into_iter().rev());
                for (frame, (pos, open)) in stack.iter_mut().zip(marks) {
                    frame.pos = pos;
                    frame.open = open;
                }
            }
        }
    }
}

/// Cursor over the files of a directory tree. Not safe for concurrent use;
/// one traversal per instance.
pub struct DirCursor<L = FsLister> {
    root: PathBuf,
    options: CursorOptions,
    lister: L,
    stack: Vec<Frame>,
    state: CursorState,
    range: Option<TimeBlock>,
    last: Option<(TimedEntry, Direction)>,
}

impl DirCursor<FsLister> {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(root, CursorOptions::new(), FsLister)
    }
}

impl<L: Lister> DirCursor<L> {
    pub fn with_options(root: impl Into<PathBuf>, options: CursorOptions, lister: L) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::InvalidRoot(root));
        }
        Ok(DirCursor {
            root,
            options,
            lister,
            stack: Vec::new(),
            state: CursorState::Reset,
            range: None,
            last: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &CursorOptions {
        &self.options
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Returns the next file, or `None` once the tree is exhausted.
    pub fn next_entry(&mut self) -> Option<TimedEntry> {
        // Without a token the only error, cancellation, cannot happen.
        self.retrieve(true, None).ok().flatten()
    }

    /// Returns the previous file, or `None` once the start is reached.
    pub fn previous_entry(&mut self) -> Option<TimedEntry> {
        self.retrieve(false, None).ok().flatten()
    }

    /// Like [`next_entry`](Self::next_entry), but gives up with
    /// [`Error::Interrupted`] once `cancel` is set, leaving the cursor as if
    /// it had not been called.
    pub fn next_entry_cancellable(&mut self, cancel: &CancelToken) -> Result<Option<TimedEntry>> {
        self.retrieve(true, Some(cancel))
    }

    pub fn previous_entry_cancellable(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<Option<TimedEntry>> {
        self.retrieve(false, Some(cancel))
    }

    /// Points the cursor at the start of the tree. The time range is kept.
    pub fn reset(&mut self) {
        self.last = None;
        self.state = CursorState::Reset;
    }

    /// Points the cursor at the end of the tree. The time range is kept.
    pub fn goto_end(&mut self) {
        self.last = None;
        self.state = CursorState::GotoEnd;
    }

    /// Points the cursor just before `target`, so that `next_entry` returns
    /// it. If `target` cannot be found the cursor falls back to the start of
    /// its nearest listed ancestor; outside the root, the cursor is
    /// exhausted until the next seek.
    pub fn goto_entry(&mut self, target: impl Into<PathBuf>) {
        self.last = None;
        self.state = CursorState::GotoFileStart(target.into());
    }

    /// Points the cursor just after `target`, so that `previous_entry`
    /// returns it.
    pub fn goto_entry_end(&mut self, target: impl Into<PathBuf>) {
        self.last = None;
        self.state = CursorState::GotoFileEnd(target.into());
    }

    /// Points the cursor at the start of the first minute directory that can
    /// contain `micros`, or at the start of the next later directory if there
    /// is none.
    ///
    /// The descent assumes directories are ordered by
    /// [`EntryOrder::DirectoryIndex`], as [`CursorOptions::new`] does.
    pub fn goto_time(&mut self, micros: i64) {
        self.last = None;
        self.state = CursorState::GotoTime(micros);
    }

    /// Restricts retrieval to directories whose span intersects `range`.
    /// Applies from the next retrieval on.
    pub fn set_time_range(&mut self, range: Option<TimeBlock>) {
        self.range = range.map(TimeBlock::normalize);
    }

    pub fn time_range(&self) -> Option<TimeBlock> {
        self.range
    }

    pub fn last_returned_entry(&self) -> Option<&Path> {
        self.last.as_ref().map(|(entry, _)| entry.path.as_path())
    }

    pub fn last_direction(&self) -> Direction {
        self.last.as_ref().map_or(Direction::None, |(_, d)| *d)
    }

    pub fn span_of_last_returned(&self) -> Option<TimeBlock> {
        self.last.as_ref().map(|(entry, _)| entry.span)
    }

    fn retrieve(&mut self, forward: bool, cancel: Option<&CancelToken>) -> Result<Option<TimedEntry>> {
        let direction = if forward {
            Direction::Forward
        } else {
            Direction::Backward
        };
        let reversing = matches!(&self.last, Some((_, d)) if *d != direction);
        let plan = match &self.state {
            CursorState::Ready if reversing => CursorState::GotoCurrent,
            state => state.clone(),
        };

        let mut checkpoint = if plan == CursorState::Ready {
            Checkpoint::positions(&self.stack)
        } else {
            Checkpoint::Full(self.stack.clone())
        };

        let outcome = self
            .resolve(&plan, forward, cancel)
            .and_then(|()| self.search(forward, cancel, &mut checkpoint));

        match outcome {
            Ok(found) => {
                self.state = CursorState::Ready;
                if let Some(entry) = &found {
                    self.last = Some((entry.clone(), direction));
                }
                Ok(found)
            }
            Err(e) => {
                checkpoint.restore(&mut self.stack);
                Err(e)
            }
        }
    }

    fn resolve(&mut self, plan: &CursorState, forward: bool, cancel: Option<&CancelToken>) -> Result<()> {
        match plan {
            CursorState::Ready => Ok(()),
            CursorState::Reset => {
                self.stack.clear();
                self.push_root().rewind();
                Ok(())
            }
            CursorState::GotoEnd => {
                self.stack.clear();
                self.push_root().wind();
                Ok(())
            }
            CursorState::GotoCurrent => match self.last.as_ref().map(|(e, _)| e.path.clone()) {
                // Step over the last entry so it is not returned twice.
                Some(current) => self.seek_entry(&current, forward, cancel),
                None => self.resolve(&CursorState::Reset, forward, cancel),
            },
            CursorState::GotoFileStart(target) => self.seek_entry(target, false, cancel),
            CursorState::GotoFileEnd(target) => self.seek_entry(target, true, cancel),
            CursorState::GotoTime(micros) => self.seek_time(*micros, cancel),
        }
    }

    fn search(
        &mut self,
        forward: bool,
        cancel: Option<&CancelToken>,
        checkpoint: &mut Checkpoint,
    ) -> Result<Option<TimedEntry>> {
        loop {
            check(cancel)?;

            let range = self.range;
            let Some(top) = self.stack.last_mut() else {
                return Ok(None);
            };

            if range.is_some_and(|r| !r.intersects(&top.span())) {
                if !self.pop(forward, checkpoint) {
                    return Ok(None);
                }
                continue;
            }

            let nf = top.files.len();
            let candidate = if forward {
                (top.pos < top.len()).then_some(top.pos)
            } else {
                top.pos.checked_sub(1)
            };

            let Some(slot) = candidate else {
                if !self.pop(forward, checkpoint) {
                    return Ok(None);
                }
                continue;
            };

            if slot < nf {
                top.pos = if forward { slot + 1 } else { slot };
                return Ok(Some(TimedEntry {
                    path: top.files[slot].path.clone(),
                    span: top.span(),
                }));
            }

            let index = slot - nf;
            if let Some(range) = range {
                let place = top.place.child(&self.options, top.dirs[index].index);
                if !range.intersects(&place.span) {
                    top.pos = if forward { slot + 1 } else { slot };
                    continue;
                }
            }

            match self.push_child(index) {
                Some(child) if forward => child.rewind(),
                Some(child) => child.wind(),
                None => return Ok(None),
            }
        }
    }

    /// Pops the top frame and resumes its parent just past it in the given
    /// direction. The root frame is never popped.
    fn pop(&mut self, forward: bool, checkpoint: &mut Checkpoint) -> bool {
        if self.stack.len() <= 1 {
            return false;
        }
        let Some(frame) = self.stack.pop() else {
            return false;
        };
        checkpoint.record_pop(frame, self.stack.len());

        if let Some(parent) = self.stack.last_mut() {
            if let Some(index) = parent.open.take() {
                parent.pos = parent.files.len() + index + usize::from(forward);
            }
        }
        true
    }

    fn push_root(&mut self) -> &mut Frame {
        let frame = Frame::open(&self.lister, &self.options, &self.root, Placement::root());
        self.stack.push(frame);
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    /// Opens subdirectory `index` of the top frame and pushes it, positioned
    /// at its start.
    fn push_child(&mut self, index: usize) -> Option<&mut Frame> {
        let top = self.stack.last_mut()?;
        let entry = top.dirs.get(index)?;
        let place = top.place.child(&self.options, entry.index);
        let child = Frame::open(&self.lister, &self.options, &entry.path, place);
        top.open = Some(index);
        self.stack.push(child);
        self.stack.last_mut()
    }

    fn seek_entry(&mut self, target: &Path, pass: bool, cancel: Option<&CancelToken>) -> Result<()> {
        self.stack.clear();

        let Ok(relative) = target.strip_prefix(&self.root) else {
            log::debug!(
                "{} is outside {}; cursor exhausted",
                target.display(),
                self.root.display()
            );
            return Ok(());
        };
        let names: Vec<_> = relative.components().map(|c| c.as_os_str()).collect();

        self.push_root().rewind();
        let Some((leaf, ancestors)) = names.split_last() else {
            return Ok(());
        };

        for name in ancestors {
            check(cancel)?;
            let found = self.stack.last().and_then(|top| {
                top.dirs
                    .iter()
                    .position(|d| d.path.file_name() == Some(*name))
            });
            let pushed = match found {
                Some(index) => self.push_child(index),
                None => None,
            };
            match pushed {
                Some(child) => child.rewind(),
                None => {
                    if let Some(top) = self.stack.last_mut() {
                        log::debug!(
                            "{} not found below {}; starting there",
                            target.display(),
                            top.dir.display()
                        );
                        top.rewind();
                    }
                    return Ok(());
                }
            }
        }

        check(cancel)?;
        let Some(top) = self.stack.last_mut() else {
            return Ok(());
        };
        let matches = |entry: &frame::Entry| entry.path.file_name() == Some(*leaf);
        let nf = top.files.len();
        if let Some(i) = top.files.iter().position(matches) {
            top.pos = i + usize::from(pass);
        } else if let Some(i) = top.dirs.iter().position(matches) {
            top.pos = nf + i + usize::from(pass);
        } else {
            log::debug!("{} vanished; starting at {}", target.display(), top.dir.display());
            top.rewind();
        }
        Ok(())
    }

    fn seek_time(&mut self, micros: i64, cancel: Option<&CancelToken>) -> Result<()> {
        // Reuse the open frames that already contain the target.
        while self.stack.last().is_some_and(|top| !top.span().contains(micros)) {
            self.stack.pop();
        }
        while self
            .stack
            .last()
            .is_some_and(|top| top.level() != TimeLevel::All && !top.level().is_calendar())
        {
            self.stack.pop();
        }

        if self.stack.is_empty() {
            self.push_root();
        }
        let Some(top) = self.stack.last_mut() else {
            return Ok(());
        };
        top.rewind();
        let mut level = top.level().next();

        let Some(target) = self.options.zone.snapshot(micros) else {
            return Ok(());
        };

        while let Some(target_index) = directory_index(&target, level) {
            check(cancel)?;
            let Some(top) = self.stack.last_mut() else {
                return Ok(());
            };

            let nf = top.files.len();
            let first = top
                .dirs
                .partition_point(|d| d.index.is_some_and(|i| i < target_index));

            match top.dirs.get(first).and_then(|d| d.index) {
                Some(index) if index == target_index => {
                    let Some(child) = self.push_child(first) else {
                        return Ok(());
                    };
                    child.rewind();
                    if child.level() != level {
                        return Ok(());
                    }
                }
                Some(_) => {
                    log::debug!(
                        "no {} directory {} in {}; stopping before the next later one",
                        level.label(),
                        target_index,
                        top.dir.display()
                    );
                    top.pos = nf + first;
                    return Ok(());
                }
                None => {
                    log::debug!(
                        "no {} directory {} or later in {}",
                        level.label(),
                        target_index,
                        top.dir.display()
                    );
                    top.wind();
                    return Ok(());
                }
            }
            level = level.next();
        }
        Ok(())
    }
}

impl<L: Lister> Iterator for DirCursor<L> {
    type Item = TimedEntry;

    fn next(&mut self) -> Option<TimedEntry> {
        self.next_entry()
    }
}

fn check(cancel: Option<&CancelToken>) -> Result<()> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(Error::Interrupted);
    }
    Ok(())
}
