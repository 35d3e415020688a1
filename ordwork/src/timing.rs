//! Helps to understand what threads are up to during a run.
//!
//! Workers time themselves with [`create_timer`] and hand the finished
//! [`JobTime`] back with their result; the finalizer, which sees every index
//! on one thread, adds them to a [`JobTimer`].

use std::{collections::HashMap, thread::ThreadId, time::Instant};

/// Tracks time for indices that run on many threads.
///
/// Not threadsafe, meant to be fed from a finalizer.
#[derive(Debug)]
pub struct JobTimer {
    /// The beginning of time
    t0: Instant,
    job_times: HashMap<ThreadId, Vec<JobTimeState>>,
}

impl Default for JobTimer {
    fn default() -> Self {
        Self {
            t0: Instant::now(),
            job_times: Default::default(),
        }
    }
}

impl JobTimer {
    /// Prepare to time things, time zero is now.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, timing: JobTime) {
        let state = match timing {
            JobTime::Done(state) => state,
            other => {
                log::warn!("trying to add unfinished timing '{other:?}'");
                return;
            }
        };
        self.job_times
            .entry(state.thread_id)
            .or_default()
            .push(state);
    }

    /// How many finished timings have been added.
    pub fn len(&self) -> usize {
        self.job_times.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many distinct threads ran something.
    pub fn thread_count(&self) -> usize {
        self.job_times.len()
    }

    /// Draw one row per thread, one box per index.
    pub fn write_svg(&mut self, out: &mut impl std::io::Write) -> Result<(), std::io::Error> {
        for timings in self.job_times.values_mut() {
            timings.sort_by_key(|t| (t.run - self.t0).as_nanos());
        }
        let mut threads: Vec<_> = self.job_times.iter().collect();
        threads.sort_by_key(|(_, timings)| timings.first().map(|t| t.run));

        let end_time = self
            .job_times
            .values()
            .flat_map(|ts| ts.iter())
            .map(|t| t.complete - self.t0)
            .max()
            .unwrap_or_default()
            .as_secs_f64()
            // avoid dividing by zero when everything took no time at all
            .max(f64::EPSILON);

        let prefix = r#"
            <svg xmlns="http://www.w3.org/2000/svg">
            <style type="text/css">
                text {
                font-family: monospace;
                font-size: 12pt;
                }
            </style>"#;

        writeln!(out, "{prefix}")?;
        let line_height = 15;
        let text_height = 12;
        for (i, (_, timings)) in threads.iter().enumerate() {
            let box_top = line_height * i;
            let text_y = box_top + text_height;
            for timing in timings.iter() {
                let job_start = (timing.run - self.t0).as_secs_f64();
                let job_end = (timing.complete - self.t0).as_secs_f64();
                let job_queued = (timing.queued - self.t0).as_secs_f64();
                let begin_pct = 100.0 * job_start / end_time;
                let exec_pct = 100.0 * (job_end - job_start) / end_time;
                let fill = color(timing.index);
                writeln!(out, "  <g index=\"{}\">", timing.index)?;
                writeln!(
                    out,
                    "    <rect x=\"{begin_pct:.2}%\" y=\"{box_top}\" width=\"{exec_pct:.2}%\" height=\"{line_height}\"  fill=\"{fill}\" stroke=\"black\" />"
                )?;
                writeln!(
                    out,
                    "    <text x=\"{begin_pct:.2}%\" y=\"{text_y}\" width=\"{exec_pct:.2}%\" height=\"{text_height}\" >{}</text>",
                    timing.index
                )?;
                writeln!(
                    out,
                    "<title>{:.0}ms ({:.2}%) index {}\nqueued at {:.0}ms\nrun at {:.0}ms\ndone at {:.0}ms</title>",
                    1000.0 * (job_end - job_start),
                    exec_pct,
                    timing.index,
                    1000.0 * job_queued,
                    1000.0 * job_start,
                    1000.0 * job_end,
                )?;
                writeln!(out, "  </g>")?;
            }
        }
        writeln!(out, "</svg>")
    }
}

fn color(index: usize) -> &'static str {
    // alternate so neighbouring indices on one row are distinguishable
    if index % 2 == 0 {
        "#830356"
    } else {
        "#00c1c9"
    }
}

/// Start timing an index.
///
/// Meant to be called when the index is about to be handed to a worker.
pub fn create_timer(index: usize) -> JobTime {
    let now = Instant::now();
    JobTime::Ready(JobTimeState {
        index,
        thread_id: std::thread::current().id(),
        queued: now,
        run: now,
        complete: now,
    })
}

/// Inner state for timing an index.
#[derive(Debug, Clone)]
pub struct JobTimeState {
    index: usize,
    thread_id: ThreadId,
    queued: Instant,
    run: Instant,
    complete: Instant,
}

/// A state machine tracking timer progress.
#[derive(Debug, Clone)]
pub enum JobTime {
    /// The index is ready to run.
    Ready(JobTimeState),
    /// The index has been submitted to a work queue.
    Queued(JobTimeState),
    /// The worker is running.
    Running(JobTimeState),
    /// The worker has completed.
    Done(JobTimeState),
}

impl JobTime {
    /// Record that the index has been queued (submitted to a threadpool)
    pub fn queued(self) -> Self {
        match self {
            JobTime::Ready(mut state) => {
                state.queued = Instant::now();
                JobTime::Queued(state)
            }
            other => {
                log::warn!("attempting to queue non-runnable timer: {other:?}");
                other
            }
        }
    }

    /// Mark that the worker is running.
    ///
    /// This records the current time and the current thread Id.
    pub fn run(self) -> Self {
        match self {
            // you can call 'run' without queuing, if needed
            JobTime::Ready(mut state) | JobTime::Queued(mut state) => {
                state.run = Instant::now();
                state.thread_id = std::thread::current().id();
                JobTime::Running(state)
            }
            other => {
                log::warn!("attempting to rerun timer: {other:?}");
                other
            }
        }
    }

    /// Finish the timer. Expects the timer to be running.
    pub fn complete(self) -> Self {
        match self {
            JobTime::Running(mut s) => {
                s.complete = Instant::now();
                JobTime::Done(s)
            }
            other => {
                log::warn!("attempting to complete non-running timer: {other:?}");
                other
            }
        }
    }

    pub fn index(&self) -> usize {
        match self {
            JobTime::Ready(s) | JobTime::Queued(s) | JobTime::Running(s) | JobTime::Done(s) => {
                s.index
            }
        }
    }
}
