use std::{
    fs,
    io::{self, Write},
    ops::AddAssign,
    path::PathBuf,
};

use clap::Parser;
use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use ordwork::{
    timing::{create_timer, JobTime, JobTimer},
    Args, ConfigError,
};

#[derive(Debug, Error)]
enum Error {
    #[error("io failed for '{path}': '{source}'")]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to stdout or stderr: '{0}'")]
    StdioWriteFail(#[source] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} of {1} files could not be read")]
    Unreadable(usize, usize),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    lines: usize,
    words: usize,
    bytes: usize,
}

impl Counts {
    fn of(data: &[u8]) -> Counts {
        Counts {
            lines: data.iter().filter(|b| **b == b'\n').count(),
            words: data
                .split(|b| b.is_ascii_whitespace())
                .filter(|w| !w.is_empty())
                .count(),
            bytes: data.len(),
        }
    }

    fn write(&self, out: &mut impl Write, name: impl std::fmt::Display) -> io::Result<()> {
        writeln!(
            out,
            "{:>8} {:>8} {:>8} {name}",
            self.lines, self.words, self.bytes
        )
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, rhs: Self) {
        self.lines += rhs.lines;
        self.words += rhs.words;
        self.bytes += rhs.bytes;
    }
}

/// What a worker leaves behind for the finalizer.
struct Counted {
    counts: Result<Counts, Error>,
    timing: JobTime,
}

/// Count every file in parallel, reporting them in the order given.
fn count_files(args: &Args, out: &mut impl Write, err: &mut impl Write) -> Result<(), Error> {
    let runner = args.config()?.runner();
    let files = &args.files;
    info!(
        "Counting {} files, at most {} at once",
        files.len(),
        runner.max_concurrency()
    );

    let counted: Vec<Mutex<Option<Counted>>> = files.iter().map(|_| Mutex::new(None)).collect();
    let mut timer = JobTimer::new();
    let mut total = Counts::default();
    let mut unreadable = 0;

    runner
        .try_run_ordered(
            files.len(),
            |idx| {
                let path = &files[idx];
                let timing = create_timer(idx).run();
                let counts = fs::read(path)
                    .map(|data| Counts::of(&data))
                    .map_err(|source| Error::FileIo {
                        path: path.clone(),
                        source,
                    });
                let timing = timing.complete();
                let counts = match counts {
                    Err(e) if args.fail_fast => return Err(e),
                    counts => counts,
                };
                *counted[idx].lock() = Some(Counted { counts, timing });
                Ok(())
            },
            |idx| {
                let Some(Counted { counts, timing }) = counted[idx].lock().take() else {
                    warn!("No result for {:?}", files[idx]);
                    return Ok(());
                };
                timer.add(timing);
                match counts {
                    Ok(counts) => {
                        total += counts;
                        counts.write(out, files[idx].display())
                    }
                    Err(e) => {
                        unreadable += 1;
                        writeln!(err, "ordwork: {e}")
                    }
                }
                .map_err(Error::StdioWriteFail)
            },
        )
        .map_err(|e| e.into_source())?;

    if files.len() > 1 {
        total.write(out, "total").map_err(Error::StdioWriteFail)?;
    }

    if let Some(timing_file) = &args.emit_timing {
        let mut svg = Vec::new();
        timer.write_svg(&mut svg).map_err(Error::StdioWriteFail)?;
        fs::write(timing_file, svg).map_err(|source| Error::FileIo {
            path: timing_file.clone(),
            source,
        })?;
        info!(
            "Wrote timing for {} files across {} threads to {timing_file:?}",
            timer.len(),
            timer.thread_count()
        );
    }

    if unreadable > 0 {
        return Err(Error::Unreadable(unreadable, files.len()));
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    env_logger::builder()
        .format(|buf, record| {
            let ts = buf.timestamp_micros();
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{}: {:?}: {style}{}{style:#}: {}",
                ts,
                std::thread::current().id(),
                record.level(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();
    let stdout = io::stdout();
    let stderr = io::stderr();
    count_files(&args, &mut stdout.lock(), &mut stderr.lock())
}
