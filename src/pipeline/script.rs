//! Line based input scripts
//!
//! Each line is either an event in the text form accepted by [`InputEvent`] or
//! a pause. `#` starts a comment.
//!
//! ```text
//! rel 0 5      # <type> <code> <value>
//! wait 50      # pause for 50ms
//! ```
//!
//! Lines are read on a dedicated OS thread and forwarded over a channel, so the
//! async side can stop on shutdown while the reader is still blocked on input.

use super::{InputEvent, InputPipeline, ParseEventError};
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LINE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLine {
    Event(InputEvent),
    Wait(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Event(#[from] ParseEventError),

    #[error("Invalid wait line: '{0}'")]
    InvalidWait(String),
}

/// Parses one script line, `Ok(None)` for blank lines and comments
pub fn parse_line(line: &str) -> Result<Option<ScriptLine>, ScriptError> {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(ms) = line.strip_prefix("wait") {
        return ms
            .trim()
            .parse::<u64>()
            .map(|ms| Some(ScriptLine::Wait(Duration::from_millis(ms))))
            .map_err(|_| ScriptError::InvalidWait(line.to_string()));
    }

    Ok(Some(ScriptLine::Event(line.parse()?)))
}

/// Forwards the lines of `reader` from a background thread
///
/// The thread ends at end of input, on a read error, or once the receiver is
/// dropped. It is never joined; a read blocked on a terminal does not keep the
/// runtime from shutting down.
pub fn spawn_line_reader<R>(reader: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    std::thread::Builder::new()
        .name("input-reader".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if sender.blocking_send(line).is_err() {
                            debug!("Line receiver dropped, stopping input reader");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        return;
                    }
                }
            }
            debug!("Input reader reached end of input");
        })?;

    Ok(receiver)
}

/// Runs script lines through `pipeline` until the input ends or `shutdown` fires
///
/// Returns the number of events processed. Malformed lines are skipped.
pub async fn feed_lines(
    mut lines: mpsc::Receiver<String>,
    pipeline: &mut InputPipeline,
    shutdown: &CancellationToken,
) -> usize {
    let mut processed = 0;

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return processed,
            line = lines.recv() => line,
        };

        let Some(line) = line else {
            info!("End of input");
            return processed;
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ScriptLine::Wait(delay))) => {
                tokio::select! {
                    _ = shutdown.cancelled() => return processed,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Ok(Some(ScriptLine::Event(event))) => {
                debug!("Input event: {}", event);
                pipeline.process(&event);
                processed += 1;
            }
            Err(e) => warn!("Skipping input line: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EventType, InputProcessor, ProcessorFlow};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use tokio::time::{timeout, Instant};

    struct Recorder {
        seen: Arc<Mutex<Vec<(InputEvent, Instant)>>>,
    }

    impl InputProcessor for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn handle_event(&mut self, event: &InputEvent) -> ProcessorFlow {
            self.seen.lock().unwrap().push((*event, Instant::now()));
            ProcessorFlow::Continue
        }
    }

    fn recording_pipeline() -> (InputPipeline, Arc<Mutex<Vec<(InputEvent, Instant)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = InputPipeline::new();
        pipeline.add_stage(Box::new(Recorder { seen: seen.clone() }));
        (pipeline, seen)
    }

    #[test]
    fn parses_script_lines() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# just a comment"), Ok(None));
        assert_eq!(
            parse_line("rel 0 5  # scroll"),
            Ok(Some(ScriptLine::Event(InputEvent::rel(0, 5))))
        );
        assert_eq!(
            parse_line("wait 50"),
            Ok(Some(ScriptLine::Wait(Duration::from_millis(50))))
        );
        assert!(matches!(
            parse_line("wait soon"),
            Err(ScriptError::InvalidWait(_))
        ));
        assert!(matches!(parse_line("rel 0"), Err(ScriptError::Event(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn feeds_events_and_honours_waits() {
        let (line_tx, lines) = mpsc::channel(8);
        for line in ["rel 0 5", "bogus line", "wait 50", "", "key 30 1"] {
            line_tx.send(line.to_string()).await.unwrap();
        }
        drop(line_tx);

        let (mut pipeline, seen) = recording_pipeline();
        let shutdown = CancellationToken::new();
        let start = Instant::now();

        assert_eq!(feed_lines(lines, &mut pipeline, &shutdown).await, 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, InputEvent::rel(0, 5));
        assert_eq!(seen[1].0.event_type, EventType::Key);
        assert!(seen[1].1 - start >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_feed_while_input_is_idle() {
        // Sender stays alive, as with a terminal nobody types into
        let (_keep_open, lines) = mpsc::channel::<String>(8);
        let (mut pipeline, _seen) = recording_pipeline();
        let shutdown = CancellationToken::new();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let fed = timeout(
            Duration::from_secs(1),
            feed_lines(lines, &mut pipeline, &shutdown),
        )
        .await;
        assert_eq!(fed, Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let (line_tx, lines) = mpsc::channel(8);
        line_tx.send("wait 60000".to_string()).await.unwrap();
        line_tx.send("rel 0 1".to_string()).await.unwrap();

        let (mut pipeline, seen) = recording_pipeline();
        let shutdown = CancellationToken::new();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert_eq!(feed_lines(lines, &mut pipeline, &shutdown).await, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reader_thread_forwards_lines_until_end_of_input() {
        let mut lines = spawn_line_reader(Cursor::new("rel 0 1\nwait 5\n")).unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("rel 0 1"));
        assert_eq!(lines.recv().await.as_deref(), Some("wait 5"));
        assert_eq!(lines.recv().await, None);
    }
}
