use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use env_logger::Builder;
use log::LevelFilter;

use camdate_core::place::NoPlaces;
use camdate_core::template::DEFAULT_TEMPLATE;

#[derive(Parser)]
#[command(
    name = "camdate",
    version,
    about = "Show, shift and rename by the capture time stored in photos and videos"
)]
struct Cli {
    /// JPEG, MP4/MOV/HEIC or PNG files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Rename files from their capture time. Fields: {datetime} {date} {time}
    /// {year} {month} {day} {hour} {minute} {second} {fn} {place}
    #[arg(
        long,
        value_name = "TEMPLATE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = DEFAULT_TEMPLATE
    )]
    rename: Option<String>,

    /// Shift capture times by this many days
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    day: i64,

    /// Shift capture times by this many hours
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    hour: i64,

    /// Shift capture times by this many minutes
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    minute: i64,

    /// Show what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print one JSON object per file
    #[arg(long)]
    json: bool,

    /// Verbosity level. Max: 2.
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn offset_seconds(&self) -> Option<i64> {
        self.day
            .checked_mul(24)?
            .checked_add(self.hour)?
            .checked_mul(60)?
            .checked_add(self.minute)?
            .checked_mul(60)
    }
}

/// Sets up env_logger with the format "LEVEL message" on stderr.
fn configure_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(buf, "{style}{}{style:#}\t{}", record.level(), record.args())
        })
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    let options = camdate_core::ProcessOptions {
        offset_seconds: cli.offset_seconds().context("offset is too large")?,
        files: cli.files,
        template: cli.rename,
        dry_run: cli.dry_run,
    };
    log::debug!("options: {}", serde_json::to_string(&options)?);

    let json = cli.json;
    let result = camdate_core::process(&options, &NoPlaces, &|report| {
        if json {
            match serde_json::to_string(report) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("{e}"),
            }
        } else {
            println!("{report}");
        }
    })?;

    log::info!(
        "{} files: {} processed, {} unrecognized, {} errors, {} rewritten, {} renamed",
        result.total,
        result.processed,
        result.unrecognized,
        result.errors,
        result.rewritten,
        result.renamed
    );
    if result.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
