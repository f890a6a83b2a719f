//! The live dashboard loop.
//!
//! One task, one cache: Ctrl-C, a refresh tick and a line from stdin are
//! awaited together with `tokio::select!`, and whichever fires is handled
//! to completion before the next is awaited. Missed ticks are skipped.

use std::time::Duration;

use console::Term;
use incident_feed_cache::FeedCache;
use incident_feed_cache::clock::Clock;
use incident_feed_cache::config::FeedConfig;
use incident_feed_cli_utils::{IndicatifProgress, MultiProgress};
use incident_feed_source::IncidentSource;
use incident_feed_source::progress::null_progress;
use incident_feed_source::socrata::SocrataSource;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use crate::render::{self, Frame};

/// A command typed into the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set the window to an absolute number of hours.
    Hours(i64),
    /// Widen or narrow the window by a number of hours.
    Adjust(i64),
    /// Fetch immediately.
    Refresh,
    /// Exit.
    Quit,
    /// Blank line: just redraw.
    Redraw,
}

/// Parses one input line.
///
/// # Errors
///
/// Returns a message suitable for logging if the line is not a command.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(Command::Redraw);
    };
    let command = match word.to_ascii_lowercase().as_str() {
        "hours" | "h" => {
            let value = parts
                .next()
                .ok_or_else(|| "usage: hours <n>".to_string())?;
            let hours = value
                .parse::<i64>()
                .map_err(|_| format!("not a number of hours: {value}"))?;
            Command::Hours(hours)
        }
        "+" => Command::Adjust(1),
        "-" => Command::Adjust(-1),
        "refresh" | "r" => Command::Refresh,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    Ok(command)
}

/// What the loop does after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// A fetch ran; carries its error, if any.
    Refreshed(Option<String>),
    Quit,
}

/// Applies one command to the cache.
async fn apply<S: IncidentSource, C: Clock>(
    cache: &mut FeedCache<S, C>,
    command: Command,
) -> Flow {
    match command {
        Command::Hours(hours) => {
            cache.set_window_hours(hours);
            Flow::Continue
        }
        Command::Adjust(delta) => {
            cache.set_window_hours(i64::from(cache.window_hours()) + delta);
            Flow::Continue
        }
        Command::Refresh => Flow::Refreshed(refresh(cache).await),
        Command::Redraw => Flow::Continue,
        Command::Quit => Flow::Quit,
    }
}

/// Seeds a cache from the configured Socrata dataset and runs the
/// dashboard until `quit` or Ctrl-C.
///
/// # Errors
///
/// Returns an error if the config is invalid, the HTTP client cannot be
/// built, or the terminal cannot be written to. Fetch failures are logged
/// and retried on the next tick.
pub async fn run<C: Clock>(
    config: &FeedConfig,
    clock: C,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let spinner = IndicatifProgress::rows_spinner(multi, "Seeding");
    let source = SocrataSource::new(config.socrata_config())?.with_progress(spinner.clone());
    let mut cache = FeedCache::new(
        source,
        clock,
        config.reprojector()?,
        config.window_settings(),
    );

    let last_error = match cache.seed().await {
        Ok(_) => None,
        Err(e) => {
            log::warn!("Seed fetch failed, retrying on next tick: {e}");
            Some(e.to_string())
        }
    };
    spinner.finish_and_clear();
    cache.source_mut().set_progress(null_progress());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Cannot listen for Ctrl-C, use `quit` to exit: {e}");
            std::future::pending::<()>().await;
        }
    };

    let term = Term::stdout();
    drive(
        &mut cache,
        config.update_interval(),
        BufReader::new(tokio::io::stdin()),
        shutdown,
        last_error,
        |cache, last_error| draw(&term, cache, last_error),
    )
    .await?;

    log::info!(
        "Exiting with {} incidents cached, watermark {}",
        cache.incidents().len(),
        cache.watermark()
    );
    Ok(())
}

/// Runs the refresh loop until `quit` is read or `shutdown` completes.
///
/// `shutdown` is polled for the whole run, so an interrupt that arrives
/// while a refresh is in flight ends the loop as soon as it returns.
/// Closed input leaves the loop running on the timer.
async fn drive<S, C, R, Q, D>(
    cache: &mut FeedCache<S, C>,
    interval: Duration,
    input: R,
    shutdown: Q,
    mut last_error: Option<String>,
    mut redraw: D,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: IncidentSource,
    C: Clock,
    R: AsyncBufRead + Unpin,
    Q: Future<Output = ()>,
    D: FnMut(&FeedCache<S, C>, Option<&str>) -> std::io::Result<()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the seed fetch stands in for it.
    ticker.tick().await;

    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(shutdown);

    redraw(&*cache, last_error.as_deref())?;

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => break,
            _ = ticker.tick() => {
                last_error = refresh(cache).await;
            }
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    input_open = false;
                    continue;
                };
                match parse_command(&line) {
                    Ok(command) => match apply(cache, command).await {
                        Flow::Continue => {}
                        Flow::Refreshed(error) => {
                            last_error = error;
                            ticker.reset();
                        }
                        Flow::Quit => break,
                    },
                    Err(message) => log::warn!("{message}"),
                }
            }
        }
        redraw(&*cache, last_error.as_deref())?;
    }

    Ok(())
}

async fn refresh<S: IncidentSource, C: Clock>(cache: &mut FeedCache<S, C>) -> Option<String> {
    match cache.fetch().await {
        Ok(report) => {
            if report.appended > 0 {
                log::info!(
                    "Appended {} incidents, watermark {}",
                    report.appended,
                    report.watermark_after
                );
            }
            None
        }
        Err(e) if e.is_transient() => {
            log::warn!("Refresh failed, keeping cached data: {e}");
            Some(e.to_string())
        }
        Err(e) => {
            log::error!("Refresh failed and is unlikely to recover on its own: {e}");
            Some(e.to_string())
        }
    }
}

fn draw<S: IncidentSource, C: Clock>(
    term: &Term,
    cache: &FeedCache<S, C>,
    last_error: Option<&str>,
) -> std::io::Result<()> {
    let (rows, cols) = term.size();
    let frame = Frame {
        now: cache.now(),
        watermark: cache.watermark(),
        hours: cache.window_hours(),
        max_hours: cache.max_hours(),
        state: cache.state(),
        totals: cache.totals(),
        visible: cache.visible().collect(),
        frequencies: cache.frequency_table(),
        last_error,
    };

    term.clear_screen()?;
    for line in render::frame(&frame, usize::from(cols), usize::from(rows)) {
        term.write_line(&line)?;
    }
    Ok(())
}
