use std::fmt;

use serde::Serialize;

/// Counters for one sort run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SortStats {
    pub files: usize,
    pub copied: usize,
    pub moved: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub undated: usize,
    /// Set when the run was cancelled before every file was handled.
    pub interrupted: bool,
}

impl fmt::Display for SortStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<6}  files found", self.files)?;
        writeln!(f)?;
        if self.copied > 0 || self.moved == 0 {
            writeln!(f, "{:<6}  files copied", self.copied)?;
        }
        if self.moved > 0 {
            writeln!(f, "{:<6}  files moved", self.moved)?;
        }
        writeln!(f, "{:<6}  duplicates found", self.duplicates)?;
        writeln!(f, "{:<6}  missing timestamps", self.undated)?;
        writeln!(f, "{:<6}  failures", self.failed)?;
        if self.interrupted {
            writeln!(f, "(cancelled)")?;
        }
        Ok(())
    }
}
