//! Append-only match history
//!
//! The simulation records events through [`AuditLog::record`], which only
//! pushes onto an unbounded channel. A background task owns the file and
//! writes one JSON object per line, so a slow disk never stalls a tick.

use log::{debug, warn};
use serde::Serialize;
use shared::{ActionKind, ClassKind, Scores, Team, Winner};
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    GameStarted {
        game_id: u64,
        seed: String,
    },
    GameEnded {
        game_id: u64,
        winner: Winner,
        scores: Scores,
        red_team_size: usize,
        blue_team_size: usize,
    },
    PlayerJoined {
        game_id: u64,
        player_id: u32,
        team: Team,
        class: ClassKind,
    },
    PlayerLeft {
        game_id: u64,
        player_id: u32,
    },
    Action {
        game_id: u64,
        player_id: u32,
        target_id: u32,
        kind: ActionKind,
        amount: u32,
        killed: bool,
    },
    Capture {
        game_id: u64,
        point_id: char,
        team: Team,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Handle used by the world to emit audit records. Cheap to clone; a
/// disabled log drops everything.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    tx: Option<mpsc::UnboundedSender<AuditRecord>>,
}

impl AuditLog {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A log whose records are handed to the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Opens `path` for appending and spawns the writer task.
    /// Must be called from within a tokio runtime.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (log, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let mut line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode audit record: {}", e);
                        continue;
                    }
                };
                line.push('\n');

                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!("Failed to write audit log {}: {}", path.display(), e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    warn!("Failed to flush audit log {}: {}", path.display(), e);
                }
            }
            debug!("Audit writer for {} stopped", path.display());
        });

        Ok(log)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queues an event. Never blocks; events are dropped once the writer
    /// has gone away.
    pub fn record(&self, timestamp_ms: u64, event: AuditEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(AuditRecord { timestamp_ms, event }).is_err() {
                debug!("Audit writer closed, dropping record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_log_drops_records() {
        let log = AuditLog::disabled();
        assert!(!log.is_enabled());
        log.record(
            1,
            AuditEvent::PlayerLeft {
                game_id: 1,
                player_id: 2,
            },
        );
    }

    #[test]
    fn test_channel_receives_records_in_order() {
        let (log, mut rx) = AuditLog::channel();
        log.record(
            10,
            AuditEvent::GameStarted {
                game_id: 10,
                seed: "42".to_string(),
            },
        );
        log.record(
            20,
            AuditEvent::Capture {
                game_id: 10,
                point_id: 'A',
                team: Team::Red,
            },
        );

        assert_eq!(rx.try_recv().unwrap().timestamp_ms, 10);
        let second = rx.try_recv().unwrap();
        assert_eq!(
            second.event,
            AuditEvent::Capture {
                game_id: 10,
                point_id: 'A',
                team: Team::Red
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let record = AuditRecord {
            timestamp_ms: 5,
            event: AuditEvent::Action {
                game_id: 1,
                player_id: 2,
                target_id: 3,
                kind: ActionKind::Attack,
                amount: 20,
                killed: true,
            },
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["event"], "action");
        assert_eq!(value["timestamp_ms"], 5);
        assert_eq!(value["target_id"], 3);
        assert_eq!(value["killed"], true);
    }

    #[tokio::test]
    async fn test_open_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("audit-test-{}.jsonl", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let log = AuditLog::open(&path).await.unwrap();
        assert!(log.is_enabled());
        log.record(
            1,
            AuditEvent::GameStarted {
                game_id: 1,
                seed: "7".to_string(),
            },
        );
        log.record(
            2,
            AuditEvent::PlayerLeft {
                game_id: 1,
                player_id: 4,
            },
        );

        let mut contents = String::new();
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            contents = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if contents.lines().count() == 2 {
                break;
            }
        }

        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "game_started");
        assert_eq!(lines[0]["seed"], "7");
        assert_eq!(lines[1]["event"], "player_left");

        let _ = tokio::fs::remove_file(&path).await;
    }
}
