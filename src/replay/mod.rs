//! # Command Replay
//!
//! Turns abstract `{target, amount}` commands into synthetic gamepad
//! presses so that remote callers drive the arm through the same arbiter
//! as the physical pad.
//!
//! For each command the adapter submits a PRESSED event carrying the
//! amount, holds it for `|amount|` milliseconds, submits the matching
//! RELEASED event (amount 0) and then waits the same time again so the
//! sampling loop sees the release before the next hold starts. The release
//! is always submitted, even when the press could not be delivered.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::EventSink;
use crate::error::{ArmError, Result};
use crate::input::{InputEvent, InputKey};

/// One abstract command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Command {
    pub target: String,
    pub amount: i16,
}

impl Command {
    #[must_use]
    pub fn new(target: impl Into<String>, amount: i16) -> Self {
        Self {
            target: target.into(),
            amount,
        }
    }

    /// How long the synthetic key is held.
    pub fn hold(&self) -> Duration {
        Duration::from_millis(u64::from(self.amount.unsigned_abs()))
    }
}

/// Ordered batch of commands, as received from the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
}

impl CommandBatch {
    /// Decode `{"commands":[{"target":"headX","amount":300}, ...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FromIterator<Command> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

/// Input key a command target drives.
///
/// Rotation targets pick their button by the sign of the amount: a positive
/// amount presses the upper bumper, zero or negative the trigger.
pub fn key_for(target: &str, amount: i16) -> Result<InputKey> {
    let key = match target {
        "platformX" => InputKey::RightX,
        "armYX" => InputKey::LeftX,
        "armY" => InputKey::LeftY,
        "headX" => InputKey::PadX,
        "headY" => InputKey::PadY,
        "headRotation" if amount > 0 => InputKey::FrontUpRight,
        "headRotation" => InputKey::FrontDownRight,
        "gripper" if amount > 0 => InputKey::FrontUpLeft,
        "gripper" => InputKey::FrontDownLeft,
        other => return Err(ArmError::UnknownTarget(other.to_string())),
    };
    Ok(key)
}

/// Outcome of one replay invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayReport {
    /// Commands whose press/release pair was attempted
    pub executed: usize,
    /// Commands with an unknown target
    pub skipped: usize,
    /// Individual submissions the arbiter refused
    pub failed_sends: usize,
    /// Commands whose hold or settle wait was cut short by shutdown
    pub interrupted: usize,
}

/// Replays command batches into an [`EventSink`].
#[derive(Clone)]
pub struct CommandReplayAdapter {
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
}

impl CommandReplayAdapter {
    pub fn new(sink: Arc<dyn EventSink>, shutdown: CancellationToken) -> Self {
        Self { sink, shutdown }
    }

    /// Replay a batch strictly in order. Never fails as a whole: problems
    /// with single commands are logged and counted in the report.
    pub async fn replay(&self, batch: &CommandBatch) -> ReplayReport {
        let mut report = ReplayReport::default();

        for command in &batch.commands {
            let key = match key_for(&command.target, command.amount) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping command: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            self.execute(command, key, &mut report).await;
            report.executed += 1;
        }

        info!(
            "Replayed {} commands ({} skipped, {} failed sends, {} interrupted)",
            report.executed, report.skipped, report.failed_sends, report.interrupted
        );
        report
    }

    async fn execute(&self, command: &Command, key: InputKey, report: &mut ReplayReport) {
        let hold = command.hold();
        let mut interrupted = false;

        debug!("{} -> {} held for {:?}", command.target, key, hold);
        match self.sink.submit(InputEvent::pressed(key, command.amount)).await {
            Ok(()) => interrupted |= !self.wait(hold).await,
            Err(e) => {
                warn!("Press of {} for {} failed: {}", key, command.target, e);
                report.failed_sends += 1;
            }
        }

        if let Err(e) = self.sink.submit(InputEvent::released(key, 0)).await {
            warn!("Release of {} for {} failed: {}", key, command.target, e);
            report.failed_sends += 1;
        }

        interrupted |= !self.wait(hold).await;
        if interrupted {
            info!("Wait for {} interrupted by shutdown", command.target);
            report.interrupted += 1;
        }
    }

    /// Sleep unless shutdown comes first; returns false when interrupted.
    async fn wait(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }

    /// Replay a batch on its own task.
    pub fn spawn(&self, batch: CommandBatch) -> JoinHandle<ReplayReport> {
        let adapter = self.clone();
        tokio::spawn(async move { adapter.replay(&batch).await })
    }

    /// Replay one JSON batch per line until EOF or shutdown. Malformed lines
    /// are logged and skipped.
    pub async fn serve_lines<R>(&self, reader: R) -> Result<ReplayReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut total = ReplayReport::default();

        loop {
            let line = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match CommandBatch::from_json(line) {
                Ok(batch) => {
                    let report = self.replay(&batch).await;
                    total.executed += report.executed;
                    total.skipped += report.skipped;
                    total.failed_sends += report.failed_sends;
                    total.interrupted += report.interrupted;
                }
                Err(e) => warn!("Ignoring command line: {}", e),
            }
        }

        debug!("Command reader stopped");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::handle::mocks::RecordingEventSink;
    use crate::input::InputState;

    fn adapter(sink: &RecordingEventSink) -> (CommandReplayAdapter, CancellationToken) {
        let token = CancellationToken::new();
        (CommandReplayAdapter::new(Arc::new(sink.clone()), token.clone()), token)
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(key_for("platformX", 10).unwrap(), InputKey::RightX);
        assert_eq!(key_for("armYX", -10).unwrap(), InputKey::LeftX);
        assert_eq!(key_for("armY", 10).unwrap(), InputKey::LeftY);
        assert_eq!(key_for("headX", 10).unwrap(), InputKey::PadX);
        assert_eq!(key_for("headY", 10).unwrap(), InputKey::PadY);
        assert_eq!(key_for("headRotation", 1).unwrap(), InputKey::FrontUpRight);
        assert_eq!(key_for("headRotation", -1).unwrap(), InputKey::FrontDownRight);
        assert_eq!(key_for("gripper", 5).unwrap(), InputKey::FrontUpLeft);
        assert_eq!(key_for("gripper", 0).unwrap(), InputKey::FrontDownLeft);
    }

    #[test]
    fn test_unknown_target() {
        let err = key_for("tail", 1).unwrap_err();
        assert!(matches!(err, ArmError::UnknownTarget(ref t) if t == "tail"));
    }

    #[test]
    fn test_batch_from_json() {
        let batch = CommandBatch::from_json(
            r#"{"commands":[{"target":"headX","amount":300},{"target":"gripper","amount":-40}]}"#,
        )
        .unwrap();
        assert_eq!(
            batch,
            CommandBatch {
                commands: vec![Command::new("headX", 300), Command::new("gripper", -40)]
            }
        );
    }

    #[test]
    fn test_batch_rejects_out_of_range_amount() {
        let result = CommandBatch::from_json(r#"{"commands":[{"target":"headX","amount":40000}]}"#);
        assert!(matches!(result, Err(ArmError::Json(_))));
    }

    #[test]
    fn test_hold_handles_minimum_amount() {
        assert_eq!(Command::new("headX", i16::MIN).hold(), Duration::from_millis(32768));
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_hold_release_timing() {
        let sink = RecordingEventSink::new();
        let (adapter, _token) = adapter(&sink);
        let batch: CommandBatch = vec![Command::new("headX", 300), Command::new("gripper", -100)]
            .into_iter()
            .collect();

        let report = adapter.replay(&batch).await;
        assert_eq!(report, ReplayReport { executed: 2, ..Default::default() });

        let events = sink.recorded();
        assert_eq!(events.len(), 4);

        let (t0, press) = events[0];
        let (t1, release) = events[1];
        assert_eq!(press.key(), InputKey::PadX);
        assert_eq!(press.state(), InputState::Pressed);
        assert_eq!(press.amount(), 300);
        assert_eq!(release.key(), InputKey::PadX);
        assert_eq!(release.state(), InputState::Released);
        assert_eq!(release.amount(), 0);
        assert!(t1 - t0 >= Duration::from_millis(300));

        // Settle gap before the next command
        let (t2, press) = events[2];
        let (t3, release) = events[3];
        assert!(t2 - t1 >= Duration::from_millis(300));
        assert_eq!(press.key(), InputKey::FrontDownLeft);
        assert_eq!(press.amount(), -100);
        assert!(!release.is_pressed());
        assert!(t3 - t2 >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_sent_when_press_fails() {
        let sink = RecordingEventSink::new();
        sink.set_fail_pressed(true);
        let (adapter, _token) = adapter(&sink);

        let report = adapter
            .replay(&CommandBatch { commands: vec![Command::new("headRotation", 250)] })
            .await;

        assert_eq!(report.executed, 1);
        assert_eq!(report.failed_sends, 1);

        let events = sink.recorded();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.key(), InputKey::FrontUpRight);
        assert!(events[0].1.is_pressed());
        assert_eq!(events[1].1.key(), InputKey::FrontUpRight);
        assert!(!events[1].1.is_pressed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_target_skipped_and_rest_replayed() {
        let sink = RecordingEventSink::new();
        let (adapter, _token) = adapter(&sink);
        let batch: CommandBatch = vec![
            Command::new("tail", 100),
            Command::new("armY", 20),
        ]
        .into_iter()
        .collect();

        let report = adapter.replay(&batch).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.executed, 1);

        let keys: Vec<_> = sink.recorded().iter().map(|(_, e)| e.key()).collect();
        assert_eq!(keys, vec![InputKey::LeftY, InputKey::LeftY]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_waits_but_still_releases() {
        let sink = RecordingEventSink::new();
        let (adapter, token) = adapter(&sink);
        token.cancel();

        let start = tokio::time::Instant::now();
        let batch: CommandBatch = vec![Command::new("platformX", 5000), Command::new("headY", 5000)]
            .into_iter()
            .collect();
        let report = adapter.replay(&batch).await;

        assert_eq!(report.executed, 2);
        assert_eq!(report.interrupted, 2);
        assert_eq!(sink.recorded().len(), 4);
        assert!(tokio::time::Instant::now() - start < Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_replay_reports() {
        let sink = RecordingEventSink::new();
        let (adapter, _token) = adapter(&sink);
        let handle = adapter.spawn(CommandBatch { commands: vec![Command::new("armYX", -50)] });

        let report = handle.await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(sink.recorded()[0].1.key(), InputKey::LeftX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_lines_skips_garbage() {
        let sink = RecordingEventSink::new();
        let (adapter, _token) = adapter(&sink);
        let input = b"{\"commands\":[{\"target\":\"headX\",\"amount\":10}]}\n\
                      not json\n\
                      \n\
                      {\"commands\":[{\"target\":\"headY\",\"amount\":10},{\"target\":\"nose\",\"amount\":1}]}\n";

        let total = adapter.serve_lines(tokio::io::BufReader::new(&input[..])).await.unwrap();

        assert_eq!(total.executed, 2);
        assert_eq!(total.skipped, 1);
        let keys: Vec<_> = sink.recorded().iter().map(|(_, e)| e.key()).collect();
        assert_eq!(keys, vec![InputKey::PadX, InputKey::PadX, InputKey::PadY, InputKey::PadY]);
    }
}
