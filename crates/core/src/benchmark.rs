//! Append-only timing and data recorder.
//!
//! The compressor is single-threaded per call, so the sink uses `RefCell`
//! and is shared by reference with the scoped [`Timer`] guards.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use serde_json::Value;

/// One recorded stage timing.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkTime {
    pub label: String,
    pub seconds: f64,
    pub task: String,
}

/// One recorded data point.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkData {
    pub label: String,
    pub data: Value,
}

#[derive(Debug, Default)]
pub struct Benchmark {
    enabled: bool,
    times: RefCell<Vec<BenchmarkTime>>,
    data: RefCell<Vec<BenchmarkData>>,
}

impl Benchmark {
    /// A sink that records only when `enabled`.
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Self::default() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn add_time(&self, label: &str, elapsed: Duration, task: &str) {
        if self.enabled {
            self.times.borrow_mut().push(BenchmarkTime { label: label.into(), seconds: elapsed.as_secs_f64(), task: task.into() });
        }
    }

    pub fn add_data(&self, label: &str, data: Value) {
        if self.enabled {
            self.data.borrow_mut().push(BenchmarkData { label: label.into(), data });
        }
    }

    pub fn times(&self) -> Vec<BenchmarkTime> {
        self.times.borrow().clone()
    }

    pub fn data(&self) -> Vec<BenchmarkData> {
        self.data.borrow().clone()
    }

    /// Number of time entries recorded so far; a mark for [`Benchmark::comments`].
    pub fn mark(&self) -> usize {
        self.times.borrow().len()
    }

    /// Start a scoped timer. The time is recorded on drop once a task is attached.
    pub fn timer(&self, label: &'static str) -> Timer<'_> {
        Timer { sink: self, label, start: Instant::now(), task: None }
    }

    /// HTML comments describing time entries recorded after `mark`, followed by the overall time.
    pub fn comments(&self, title: &str, mark: usize, overall: Duration) -> String {
        let title = escape(title);
        let mut out = String::new();

        let times = self.times.borrow();
        let recent = times.get(mark..).unwrap_or_default();
        if !recent.is_empty() {
            out.push('\n');
        }
        for time in recent {
            out.push_str(&format!("\n<!-- {title} took {:.5} seconds {}. -->", time.seconds, escape(&time.task)));
        }

        out.push_str(&format!("\n\n<!-- {title} took {:.5} seconds (overall). -->", overall.as_secs_f64()));
        out
    }
}

/// Records elapsed time into a [`Benchmark`] when dropped.
#[derive(Debug)]
pub struct Timer<'a> {
    sink: &'a Benchmark,
    label: &'static str,
    start: Instant,
    task: Option<String>,
}

impl Timer<'_> {
    /// Describe what the timed scope did; without a task nothing is recorded.
    pub fn task(&mut self, task: impl Into<String>) {
        self.task = Some(task.into());
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.sink.add_time(self.label, self.start.elapsed(), &task);
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
