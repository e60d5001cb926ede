use std::sync::LazyLock;

use regex::Regex;

use crate::time_index::parse_directory_index;

static CHANNEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|-)(\d+)").expect("Invalid regex for channel"));

/// Recording formats whose file names start with a channel number, e.g.
/// `21_kitchen_2005.squint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Squint,
    Wink,
    Bepcm,
}

impl DataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Squint => ".squint",
            DataFormat::Wink => ".wink",
            DataFormat::Bepcm => ".bepcm",
        }
    }
}

/// Which files a cursor returns. Hidden files are never returned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileFilter {
    #[default]
    Visible,
    Jpeg,
    /// Files whose name carries the given channel number.
    Channel(u32),
    /// Files of one format, optionally restricted to a channel.
    Format {
        format: DataFormat,
        channel: Option<u32>,
    },
}

impl FileFilter {
    pub fn accepts(&self, name: &str) -> bool {
        if is_hidden(name) {
            return false;
        }
        match self {
            FileFilter::Visible => true,
            FileFilter::Jpeg => is_jpeg_file(name),
            FileFilter::Channel(channel) => parse_channel(name) == Some(*channel),
            FileFilter::Format { format, channel } => {
                name.ends_with(format.extension())
                    && match channel {
                        Some(channel) => parse_channel(name) == Some(*channel),
                        None => parse_channel(name).is_some(),
                    }
            }
        }
    }
}

/// Which directories a cursor descends into. Hidden directories are never
/// entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirFilter {
    #[default]
    Visible,
    /// Only directories whose names start with a directory index.
    Indexed,
}

impl DirFilter {
    pub fn accepts(&self, name: &str) -> bool {
        if is_hidden(name) {
            return false;
        }
        match self {
            DirFilter::Visible => true,
            DirFilter::Indexed => parse_directory_index(name).is_some(),
        }
    }
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

pub fn is_jpeg_file(name: &str) -> bool {
    let name = name.to_lowercase();
    name.ends_with(".jpg") || name.ends_with(".jpeg")
}

/// The channel number at the start of a file name (or after a `-`), e.g. 21
/// for `21_kitchen_2005.squint`.
pub fn parse_channel(name: &str) -> Option<u32> {
    CHANNEL_PATTERN
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
