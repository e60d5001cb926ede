use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use photo_sorter::cursor::{FileFilter, FsLister};
use photo_sorter::sort::naming::TOKENS;
use photo_sorter::sort::{DEFAULT_FILE_PATTERN, DEFAULT_UNDATED_PATTERN, SortEvent};
use photo_sorter::{
    CancelToken, CursorOptions, DirCursor, SortConfig, Sorter, TimeBlock, Zone,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy or move photos into folders named after their capture time
    #[command(after_help = pattern_help())]
    Sort {
        /// Input directory or file
        input: PathBuf,
        /// Output directory path
        output: PathBuf,
        /// Move files instead of copying them
        #[arg(long = "move")]
        move_files: bool,
        /// Print actions without copying files
        #[arg(long)]
        dry_run: bool,
        /// Naming pattern for files with a capture time
        #[arg(long, default_value = DEFAULT_FILE_PATTERN)]
        pattern: String,
        /// Naming pattern for files without a capture time
        #[arg(long, default_value = DEFAULT_UNDATED_PATTERN)]
        undated_pattern: String,
        /// Interpret capture times in the local time zone instead of UTC
        #[arg(long)]
        local: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the files of a time-indexed tree in order
    List {
        /// Root of the tree
        root: PathBuf,
        /// Walk from the end towards the start
        #[arg(long)]
        reverse: bool,
        /// Skip directories that end before this time (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        from: Option<i64>,
        /// Skip directories that start at or after this time (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        to: Option<i64>,
        /// Start at the minute directory containing this time (RFC 3339)
        #[arg(long, value_parser = parse_time, conflicts_with = "after")]
        goto: Option<i64>,
        /// Resume after this file
        #[arg(long)]
        after: Option<PathBuf>,
        /// Only list JPEG files
        #[arg(long, conflicts_with = "channel")]
        jpeg: bool,
        /// Only list files recorded on this channel
        #[arg(long)]
        channel: Option<u32>,
        /// Interpret directory names in the local time zone instead of UTC
        #[arg(long)]
        local: bool,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
}

fn pattern_help() -> String {
    let mut help = String::from("Pattern tokens:\n");
    for (token, description) in TOKENS {
        help.push_str(&format!("  {token:<8} {description}\n"));
    }
    help
}

fn parse_time(s: &str) -> Result<i64, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_micros())
        .map_err(|e| format!("invalid time '{s}': {e}"))
}

fn zone(local: bool) -> Zone {
    if local { Zone::Local } else { Zone::Utc }
}

fn progress_bar(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .expect("Failed to set progress bar style"),
    );
    pb.set_message(message);
    pb
}

fn run_sort(config: SortConfig, json: bool) -> Result<()> {
    let sorter = Sorter::new(config).context("Invalid naming pattern")?;
    let pb = progress_bar("Locating files...");

    let stats = sorter.run(&CancelToken::new(), |event| match event {
        SortEvent::Located { files } => {
            pb.set_length(files as u64 * 2);
            pb.set_message("Reading timestamps...");
        }
        SortEvent::Scanned { .. } => pb.inc(1),
        SortEvent::Sorted { .. } => {
            pb.set_message("Sorting files...");
            pb.inc(1);
        }
    })?;
    pb.finish_with_message("Sorting complete");

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{stats}");
    }
    Ok(())
}

struct ListArgs {
    root: PathBuf,
    reverse: bool,
    range: Option<TimeBlock>,
    goto: Option<i64>,
    after: Option<PathBuf>,
    filter: FileFilter,
    zone: Zone,
    json: bool,
}

fn run_list(args: ListArgs) -> Result<()> {
    let options = CursorOptions::new().file_filter(args.filter).zone(args.zone);
    let mut cursor = DirCursor::with_options(&args.root, options, FsLister)
        .with_context(|| format!("Cannot list {}", args.root.display()))?;
    cursor.set_time_range(args.range);

    match (args.goto, args.after) {
        (Some(micros), _) => cursor.goto_time(micros),
        (None, Some(after)) if args.reverse => cursor.goto_entry(after),
        (None, Some(after)) => cursor.goto_entry_end(after),
        (None, None) if args.reverse => cursor.goto_end(),
        (None, None) => {}
    }

    let mut count = 0;
    loop {
        let entry = if args.reverse {
            cursor.previous_entry()
        } else {
            cursor.next_entry()
        };
        let Some(entry) = entry else { break };
        count += 1;

        if args.json {
            let line = json!({
                "path": entry.path,
                "start": entry.span.start(),
                "stop": entry.span.stop(),
            });
            println!("{line}");
        } else {
            println!("{}\t{}", entry.path.display(), entry.span);
        }
    }
    log::info!("Listed {} files", count);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args = Args::parse();

    match args.command {
        Command::Sort {
            input,
            output,
            move_files,
            dry_run,
            pattern,
            undated_pattern,
            local,
            json,
        } => {
            let config = SortConfig {
                move_files,
                dry_run,
                pattern,
                undated_pattern,
                zone: zone(local),
                ..SortConfig::new(input, output)
            };
            run_sort(config, json)
        }
        Command::List {
            root,
            reverse,
            from,
            to,
            goto,
            after,
            jpeg,
            channel,
            local,
            json,
        } => {
            let range = (from.is_some() || to.is_some())
                .then(|| TimeBlock::from_micros(from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX)));
            let filter = match (jpeg, channel) {
                (true, _) => FileFilter::Jpeg,
                (false, Some(channel)) => FileFilter::Channel(channel),
                (false, None) => FileFilter::Visible,
            };
            run_list(ListArgs {
                root,
                reverse,
                range,
                goto,
                after,
                filter,
                zone: zone(local),
                json,
            })
        }
    }
}
