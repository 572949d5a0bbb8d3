//! Command-line front-end for the parallel FLV downloader.
//!
//! Thin by design: builds the seek-URL capability, wires the engine's events
//! to either per-part progress bars or stderr, and maps the outcome to an
//! exit code.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use url::Url;

use rtflv_engine::{
    DownloadConfig, Event, EventBus, EventKind, FileLock, ParallelDownloader, UrlBuilder,
};

/// Download a seekable real-time FLV stream in parallel parts.
#[derive(Debug, Parser)]
#[command(name = "rtflv", version, about)]
struct Args {
    /// URL of the FLV stream; seeking appends a `seek=<seconds>` parameter.
    url: String,

    /// File to save the stream to.
    outfile: PathBuf,

    /// Number of parts to download in parallel.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    parts: u32,

    /// Print debug and info events to stderr instead of progress bars.
    #[arg(long)]
    debug: bool,

    /// Start over instead of resuming existing output files.
    #[arg(long)]
    no_resume: bool,

    /// Refuse to run while another download holds `<outfile>.lock`.
    #[arg(long)]
    lock: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let url_fn = match seek_url_fn(&args.url) {
        Ok(url_fn) => url_fn,
        Err(e) => {
            eprintln!("invalid url `{}`: {e}", args.url);
            return ExitCode::from(2);
        }
    };

    // Held for the whole run; the guard releases the lockfile on every exit
    // path, including failures below.
    let _lock = if args.lock {
        match FileLock::acquire(&args.outfile) {
            Some(lock) => Some(lock),
            None => {
                eprintln!(
                    "{} is locked by another download",
                    args.outfile.display()
                );
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let config = DownloadConfig {
        parts: args.parts,
        resume: !args.no_resume,
        ..DownloadConfig::default()
    };
    let mut downloader = match ParallelDownloader::new(config) {
        Ok(downloader) => downloader,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if args.debug {
        downloader.events_mut().connect(EventKind::Debug, print_message);
        downloader.events_mut().connect(EventKind::Info, print_message);
    } else {
        attach_progress_display(downloader.events_mut(), args.parts);
    }

    match downloader.download(url_fn, &args.outfile).await {
        Ok(summary) => {
            println!(
                "Downloaded {:.1}s to {}",
                summary.duration_secs,
                args.outfile.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("download failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Seek capability: the stream URL with a `seek=<seconds>` query parameter
/// appended, composing with any existing query string.
fn seek_url_fn(base: &str) -> Result<UrlBuilder, url::ParseError> {
    let base = Url::parse(base)?;
    Ok(Arc::new(move |seconds| {
        let mut url = base.clone();
        url.query_pairs_mut()
            .append_pair("seek", &seconds.to_string());
        url.to_string()
    }))
}

fn print_message(event: &Event) {
    if let Event::Debug { message, part } | Event::Info { message, part } = event {
        match part {
            Some(part) => eprintln!("Part {part}: {message}"),
            None => eprintln!("{message}"),
        }
    }
}

/// One progress bar per part, plus headline lines for duration and filesize.
fn attach_progress_display(events: &mut EventBus, parts: u32) {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("P{prefix:<2} [{bar:40}] {percent:>3}%")
        .expect("static progress template")
        .progress_chars("=> ");

    let bars: Vec<ProgressBar> = (0..parts)
        .map(|part| {
            let bar = multi.add(ProgressBar::new(1_000));
            bar.set_style(style.clone());
            bar.set_prefix(part.to_string());
            bar.set_position(0);
            bar
        })
        .collect();

    let progress_bars = bars.clone();
    events.connect(EventKind::Progress, move |event| {
        if let Event::Progress { fraction, part } = event {
            progress_bars[*part as usize].set_position((fraction * 1_000.0) as u64);
        }
    });

    let finished_bars = bars.clone();
    events.connect(EventKind::PartFinished, move |event| {
        if let Event::PartFinished(part) = event {
            let bar = &finished_bars[*part as usize];
            bar.set_position(1_000);
            bar.finish();
        }
    });

    let failed_bars = bars;
    events.connect(EventKind::PartFailed, move |event| {
        if let Event::PartFailed(part) = event {
            failed_bars[*part as usize].abandon_with_message("failed");
        }
    });

    let duration_out = multi.clone();
    events.connect(EventKind::GotDuration, move |event| {
        if let Event::GotDuration(seconds) = event {
            let _ = duration_out.println(format!("Duration: {seconds}"));
        }
    });

    events.connect(EventKind::GotFilesize, move |event| {
        if let Event::GotFilesize(bytes) = event {
            let _ = multi.println(format!("Filesize: {bytes}"));
        }
    });
}
