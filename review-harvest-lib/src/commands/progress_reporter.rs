use crate::harvest::Progress;
use core::fmt::{Debug, Formatter};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

/// How often the bar pulls fresh numbers from the harvest pipeline.
const TICK: Duration = Duration::from_millis(250);

const BAR_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {pos}/{len} {msg}";
const BAR_TEMPLATE_PLAIN: &str = "{prefix:>12} [{bar:25}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{spinner}] {msg}";
const SPINNER_TEMPLATE_PLAIN: &str = "{prefix:>12} [{spinner}] {msg}";

const SPINNER_FRAMES: &[&str] = &[
    "=>                       ",
    "  ===>                   ",
    "      ===>               ",
    "          ===>           ",
    "              ===>       ",
    "                  ===>   ",
    "                     ===>",
    "                   <===  ",
    "               <===      ",
    "           <===          ",
    "       <===              ",
    "   <===                  ",
    "<===                     ",
    "                         ",
];

/// What the bar currently displays.
enum Readout {
    /// Counted work such as the pull requests of one repository.
    Counted(Box<dyn Fn() -> (u64, u64, String) + Send + Sync>),

    /// Open-ended work such as discovery; the elapsed time is prepended to the message.
    Open(Box<dyn Fn() -> String + Send + Sync>),
}

struct Shared {
    shown: bool,
    show_at: Instant,
    phase_started: Instant,
    readout: Readout,
}

impl Shared {
    /// Reveal the bar once the startup delay has passed.
    fn reveal_if_due(&mut self, bar: &ProgressBar) {
        if !self.shown && Instant::now() >= self.show_at {
            self.shown = true;
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(4));
        }
    }

    fn refresh(&self, bar: &ProgressBar) {
        match &self.readout {
            Readout::Counted(read) => {
                let (total, done, message) = read();
                if total > 0 {
                    bar.set_length(total);
                    bar.set_position(done);
                }
                bar.set_message(message);
            }
            Readout::Open(read) => {
                let elapsed = Duration::from_secs(self.phase_started.elapsed().as_secs());
                bar.set_message(format!("{}: {}", humantime::format_duration(elapsed), read()));
            }
        }
    }
}

/// Terminal progress for a harvest run.
///
/// Short runs never show a bar: it stays hidden until `delay` has passed, after which a
/// background task refreshes it from the pipeline's callbacks. Lines printed through
/// [`Progress::println`] are written above the bar without tearing it.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    shared: Arc<Mutex<Shared>>,
    ticker: Arc<JoinHandle<()>>,
    use_colors: bool,
}

impl ProgressReporter {
    /// Create a hidden reporter that reveals itself after `delay`.
    ///
    /// Must be called from within a tokio runtime. When `use_colors` is false the phase
    /// label is rendered without ANSI styling.
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool) -> Self {
        let bar = ProgressBar::hidden();
        let now = Instant::now();

        let shared = Arc::new(Mutex::new(Shared {
            shown: false,
            show_at: now + delay,
            phase_started: now,
            readout: Readout::Open(Box::new(String::new)),
        }));

        let ticker = tokio::spawn(tick(bar.clone(), Arc::clone(&shared)));

        Self {
            bar,
            shared,
            ticker: Arc::new(ticker),
            use_colors,
        }
    }

    fn style(&self, colored: &str, plain: &str, spinner: bool) -> ProgressStyle {
        let template = if self.use_colors { colored } else { plain };
        let base = if spinner {
            ProgressStyle::default_spinner().tick_strings(SPINNER_FRAMES)
        } else {
            ProgressStyle::default_bar().progress_chars("=> ")
        };
        base.template(template).expect("progress templates are static and valid")
    }

    fn shown(&self) -> bool {
        self.shared.lock().expect("lock poisoned").shown
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
        self.shared.lock().expect("lock poisoned").phase_started = Instant::now();
    }

    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {
        self.shared.lock().expect("lock poisoned").readout = Readout::Counted(callback);
        self.bar.disable_steady_tick();
        self.bar.set_length(0);
        self.bar.set_position(0);
        self.bar.set_style(self.style(BAR_TEMPLATE, BAR_TEMPLATE_PLAIN, false));
    }

    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {
        {
            let mut shared = self.shared.lock().expect("lock poisoned");
            shared.readout = Readout::Open(callback);
            shared.phase_started = Instant::now();
        }
        self.bar.set_style(self.style(SPINNER_TEMPLATE, SPINNER_TEMPLATE_PLAIN, true));
        self.bar.enable_steady_tick(TICK);
    }

    fn println(&self, msg: &str) {
        self.bar.suspend(|| eprintln!("{msg}"));
    }

    fn done(&self) {
        self.ticker.abort();
        if self.shown() {
            self.bar.finish_and_clear();
        }
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bar", &self.bar)
            .field("shown", &self.shown())
            .field("use_colors", &self.use_colors)
            .finish_non_exhaustive()
    }
}

async fn tick(bar: ProgressBar, shared: Arc<Mutex<Shared>>) {
    let mut interval = tokio::time::interval(TICK);
    #[expect(clippy::infinite_loop, reason = "aborted by ProgressReporter::done")]
    loop {
        let _ = interval.tick().await;

        let mut shared = shared.lock().expect("lock poisoned");
        shared.reveal_if_due(&bar);
        if shared.shown {
            shared.refresh(&bar);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hidden_reporter_accepts_all_calls() {
        let reporter = ProgressReporter::new(Duration::from_secs(3600), false);

        reporter.set_phase("Discovering");
        reporter.set_indeterminate(Box::new(|| "searching".to_string()));
        reporter.set_phase("Harvesting");
        reporter.set_determinate(Box::new(|| (10, 3, "o/r".to_string())));
        reporter.println("Harvested o/r");
        reporter.done();

        assert!(!reporter.shown());
        assert!(format!("{reporter:?}").contains("ProgressReporter"));
    }

    #[tokio::test]
    async fn test_colored_templates_are_valid() {
        let reporter = ProgressReporter::new(Duration::from_secs(3600), true);
        reporter.set_determinate(Box::new(|| (1, 1, String::new())));
        reporter.set_indeterminate(Box::new(String::new));
        reporter.done();
    }

    #[test]
    fn test_refresh_reports_counts() {
        let bar = ProgressBar::hidden();
        let now = Instant::now();
        let shared = Shared {
            shown: true,
            show_at: now,
            phase_started: now,
            readout: Readout::Counted(Box::new(|| (20, 5, "o/r: 2 reviewed pull requests".to_string()))),
        };

        shared.refresh(&bar);

        assert_eq!(bar.length(), Some(20));
        assert_eq!(bar.position(), 5);
        assert_eq!(bar.message(), "o/r: 2 reviewed pull requests");
    }

    #[test]
    fn test_refresh_prefixes_elapsed_time() {
        let bar = ProgressBar::hidden();
        let now = Instant::now();
        let shared = Shared {
            shown: true,
            show_at: now,
            phase_started: now,
            readout: Readout::Open(Box::new(|| "searching".to_string())),
        };

        shared.refresh(&bar);

        assert_eq!(bar.message(), "0s: searching");
    }
}
