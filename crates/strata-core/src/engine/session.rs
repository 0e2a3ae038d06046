//! Session snapshot types and (de)serialization entry points
//!
//! The engine can serialize enough of its public state surface to
//! reconstruct a session: voice count, per-voice loop geometry and
//! control settings, and the global tempo/sync configuration. The
//! snapshot is plain serde data written as JSON; loop *audio* travels
//! separately through the WAV load/save events.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from session and loop-file operations (non-RT threads only)
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no such voice: {0}")]
    NoSuchVoice(usize),

    #[error("voice limit reached ({0})")]
    VoiceLimit(usize),

    #[error("voice has no loop to save")]
    EmptyLoop,

    #[error("audio does not fit the voice's loop memory")]
    TooLong,

    #[error("audio file error: {0}")]
    File(#[from] hound::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// One named control value in a snapshot
///
/// Controls are stored by name rather than enum discriminant so saved
/// sessions survive control-table reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSetting {
    pub name: String,
    pub value: f32,
}

/// Saved state of one voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSnapshot {
    /// Undo history depth at save time
    pub chunk_count: usize,
    pub loop_length_secs: f32,
    pub loop_position_secs: f32,
    pub cycle_length_secs: f32,
    /// LooperState as u8
    pub state: u8,
    pub controls: Vec<ControlSetting>,
}

/// Saved state of the whole engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub tempo: f32,
    /// Wire encoding of [`crate::types::SyncSource`]
    pub sync_source: f32,
    pub eighths_per_cycle: f32,
    pub selected_voice: usize,
    pub voices: Vec<VoiceSnapshot>,
}

/// Write a snapshot to disk as JSON
pub fn save_to(path: &Path, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), snapshot)?;
    Ok(())
}

/// Read a snapshot back from disk
pub fn load_from(path: &Path) -> Result<SessionSnapshot, SessionError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trips_through_disk() {
        let snap = SessionSnapshot {
            tempo: 97.5,
            sync_source: -2.0,
            eighths_per_cycle: 8.0,
            selected_voice: 1,
            voices: vec![VoiceSnapshot {
                chunk_count: 3,
                loop_length_secs: 2.5,
                loop_position_secs: 0.75,
                cycle_length_secs: 1.25,
                state: 4,
                controls: vec![ControlSetting {
                    name: "feedback".into(),
                    value: 0.9,
                }],
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save_to(&path, &snap).unwrap();
        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.tempo, 97.5);
        assert_eq!(loaded.sync_source, -2.0);
        assert_eq!(loaded.voices.len(), 1);
        assert_eq!(loaded.voices[0].chunk_count, 3);
        assert_eq!(loaded.voices[0].controls[0].name, "feedback");
    }
}
