//! The engine's non-real-time service loop
//!
//! Everything that may block or allocate (voice add/remove, WAV
//! import/export, session save/restore, parameter queries, update
//! registration) runs here, on a thread the caller spawns for
//! [`EngineService::run`]. The service takes the real voice lock for
//! its operations; the audio thread try-locks and plays a silent block
//! rather than waiting, which is the contract that keeps the callback
//! deadline safe.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender};

use crate::command_map::CommandMap;
use crate::event::EventKind;
use crate::event_nonrt::{EventNonRT, NonRtResult};
use crate::looper::{ControlId, Controls, Looper, VoiceAtomics, SETTABLE_CONTROLS};
use crate::types::Sample;

use super::notify::{Notification, NotificationHub};
use super::session::{self, ControlSetting, SessionError, SessionSnapshot, VoiceSnapshot};
use super::{EngineHandle, MAX_VOICES};

/// WAV transfer chunk size in samples
const FILE_CHUNK: usize = 16384;

/// Non-RT half of the engine
pub struct EngineService {
    rx: Receiver<EventNonRT>,
    voices: Arc<Mutex<Vec<Looper>>>,
    voice_atomics: Arc<Mutex<Vec<Arc<VoiceAtomics>>>>,
    mirror: Arc<Mutex<Vec<Controls>>>,
    notify: Arc<NotificationHub>,
    handle: EngineHandle,
    sample_rate: u32,
    default_loop_secs: f32,
}

impl EngineService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rx: Receiver<EventNonRT>,
        voices: Arc<Mutex<Vec<Looper>>>,
        voice_atomics: Arc<Mutex<Vec<Arc<VoiceAtomics>>>>,
        mirror: Arc<Mutex<Vec<Controls>>>,
        notify: Arc<NotificationHub>,
        handle: EngineHandle,
        sample_rate: u32,
        default_loop_secs: f32,
    ) -> Self {
        Self {
            rx,
            voices,
            voice_atomics,
            mirror,
            notify,
            handle,
            sample_rate,
            default_loop_secs,
        }
    }

    /// Block on the non-RT queue until a Quit event arrives
    pub fn run(&mut self) {
        while let Ok(ev) = self.rx.recv() {
            if !self.handle_event(ev) {
                break;
            }
        }
        log::info!("engine service loop exiting");
    }

    /// Process one non-RT event; false means Quit
    pub fn handle_event(&mut self, ev: EventNonRT) -> bool {
        match ev {
            EventNonRT::AddLoop { secs, reply } => {
                let result = self.add_loop(secs);
                Self::finish(reply, result);
            }
            EventNonRT::RemoveLoop { index, reply } => {
                let result = self.remove_loop(index);
                Self::finish(reply, result);
            }
            EventNonRT::LoadLoop { voice, path, reply } => {
                let result = self.load_loop(voice, &path);
                Self::finish(reply, result);
            }
            EventNonRT::SaveLoop { voice, path, reply } => {
                let result = self.save_loop(voice, &path);
                Self::finish(reply, result);
            }
            EventNonRT::GetParam {
                voice,
                control,
                reply,
            } => {
                let _ = reply.send(self.handle.get_control_value(control, voice));
            }
            EventNonRT::SaveSession { path, reply } => {
                let result = self.save_session(&path);
                Self::finish(reply, result);
            }
            EventNonRT::LoadSession { path, reply } => {
                let result = self.load_session(&path);
                Self::finish(reply, result);
            }
            EventNonRT::Register { reply } => {
                let _ = reply.send(self.notify.subscribe());
            }
            EventNonRT::Ping { reply } => {
                let count = self.voices.lock().expect("voices lock").len();
                let _ = reply.send(count);
            }
            EventNonRT::Quit => return false,
        }
        true
    }

    fn finish(reply: Option<Sender<NonRtResult>>, result: NonRtResult) {
        if let Err(err) = &result {
            log::warn!("non-rt operation failed: {err}");
        }
        if let Some(tx) = reply {
            let _ = tx.send(result);
        }
    }

    /// Add a voice with `secs` seconds of loop memory
    pub fn add_loop(&mut self, secs: f32) -> NonRtResult {
        let secs = if secs > 0.0 { secs } else { self.default_loop_secs };
        let mut voices = self.voices.lock().expect("voices lock");
        if voices.len() >= MAX_VOICES {
            return Err(SessionError::VoiceLimit(MAX_VOICES));
        }
        let index = voices.len();
        let looper = Looper::new(index, self.sample_rate, secs);
        self.voice_atomics
            .lock()
            .expect("atomics lock")
            .push(looper.atomics());
        self.mirror
            .lock()
            .expect("mirror lock")
            .push(Controls::new());
        voices.push(looper);
        drop(voices);

        log::info!("added loop voice {index}");
        self.notify.broadcast(Notification::LoopAdded { index });
        Ok(())
    }

    /// Remove the voice at `index`
    pub fn remove_loop(&mut self, index: usize) -> NonRtResult {
        let mut voices = self.voices.lock().expect("voices lock");
        if index >= voices.len() {
            return Err(SessionError::NoSuchVoice(index));
        }
        voices.remove(index);
        self.voice_atomics.lock().expect("atomics lock").remove(index);
        self.mirror.lock().expect("mirror lock").remove(index);
        drop(voices);

        log::info!("removed loop voice {index}");
        self.notify.broadcast(Notification::LoopRemoved { index });
        Ok(())
    }

    /// Load a WAV file as the voice's new loop (mono fold-down)
    fn load_loop(&mut self, voice: usize, path: &Path) -> NonRtResult {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<Sample> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        let mono: Vec<Sample> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let mut voices = self.voices.lock().expect("voices lock");
        let looper = voices
            .get_mut(voice)
            .ok_or(SessionError::NoSuchVoice(voice))?;
        if !looper.load_loop_audio(&mono) {
            return Err(SessionError::TooLong);
        }
        log::info!(
            "loaded {} samples into voice {voice} from {}",
            mono.len(),
            path.display()
        );
        Ok(())
    }

    /// Save the voice's current loop as a mono float WAV
    fn save_loop(&mut self, voice: usize, path: &Path) -> NonRtResult {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;

        let voices = self.voices.lock().expect("voices lock");
        let looper = voices.get(voice).ok_or(SessionError::NoSuchVoice(voice))?;
        let total = looper.loop_length();
        if total == 0 {
            return Err(SessionError::EmptyLoop);
        }

        let mut buf = vec![0.0f32; FILE_CHUNK];
        let mut offset = 0u64;
        while offset < total {
            let n = looper.read_loop_audio(offset, &mut buf);
            if n == 0 {
                break;
            }
            for &s in &buf[..n] {
                writer.write_sample(s)?;
            }
            offset += n as u64;
        }
        drop(voices);
        writer.finalize()?;
        log::info!("saved voice {voice} loop ({total} samples) to {}", path.display());
        Ok(())
    }

    /// Capture the current session state and write it to disk
    fn save_session(&mut self, path: &Path) -> NonRtResult {
        let snapshot = self.snapshot();
        session::save_to(path, &snapshot)
    }

    /// Build a snapshot of the public engine state
    pub fn snapshot(&self) -> SessionSnapshot {
        let sr = self.sample_rate as f32;
        let voices = self.voices.lock().expect("voices lock");
        let voice_snaps = voices
            .iter()
            .map(|l| {
                let controls = (0..SETTABLE_CONTROLS as u8)
                    .filter_map(ControlId::from_index)
                    .map(|id| ControlSetting {
                        name: id.name().to_string(),
                        value: l.controls().get(id),
                    })
                    .collect();
                VoiceSnapshot {
                    chunk_count: l.history_len(),
                    loop_length_secs: l.loop_length() as f32 / sr,
                    loop_position_secs: l.position() as f32 / sr,
                    cycle_length_secs: l.cycle_length() as f32 / sr,
                    state: l.state() as u8,
                    controls,
                }
            })
            .collect();
        drop(voices);

        SessionSnapshot {
            tempo: self.handle.get_control_value(ControlId::Tempo, -2),
            sync_source: self.handle.get_control_value(ControlId::SyncSource, -2),
            eighths_per_cycle: self
                .handle
                .get_control_value(ControlId::EighthsPerCycle, -2),
            selected_voice: self.handle.get_control_value(ControlId::SelectedLoopNum, -2)
                as usize,
            voices: voice_snaps,
        }
    }

    /// Restore a session: voice count, globals, per-voice controls
    ///
    /// Loop geometry in the snapshot is informational; loop audio is
    /// restored separately through LoadLoop events.
    fn load_session(&mut self, path: &Path) -> NonRtResult {
        let snapshot = session::load_from(path)?;
        self.apply_snapshot(&snapshot)
    }

    /// Apply a snapshot through the engine's public event surface
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot) -> NonRtResult {
        let target = snapshot.voices.len().min(MAX_VOICES);
        loop {
            let count = self.voices.lock().expect("voices lock").len();
            if count < target {
                self.add_loop(self.default_loop_secs)?;
            } else if count > target {
                self.remove_loop(count - 1)?;
            } else {
                break;
            }
        }

        self.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::Tempo,
            snapshot.tempo,
            -2,
            0,
        );
        self.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::SyncSource,
            snapshot.sync_source,
            -2,
            0,
        );
        self.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::EighthsPerCycle,
            snapshot.eighths_per_cycle,
            -2,
            0,
        );
        self.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::SelectedLoopNum,
            snapshot.selected_voice as f32,
            -2,
            0,
        );

        let map = CommandMap::new();
        for (i, vs) in snapshot.voices.iter().enumerate() {
            for setting in &vs.controls {
                if let Some(ctrl) = map.control(&setting.name) {
                    self.handle.push_control_event(
                        EventKind::ControlSet,
                        ctrl,
                        setting.value,
                        i as i32,
                        0,
                    );
                } else {
                    log::debug!("ignoring unknown control '{}' in session", setting.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig, EngineSetup};
    use crossbeam::channel::bounded;

    const SR: u32 = 48000;

    fn setup(voices: usize) -> EngineSetup {
        Engine::create(EngineConfig {
            sample_rate: SR,
            loop_secs: 1.0,
            initial_voices: voices,
        })
    }

    #[test]
    fn test_loop_wav_round_trip() {
        let mut setup = setup(1);
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("in.wav");
        let out_path = dir.path().join("out.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SR,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let samples: Vec<f32> = (0..300).map(|i| (i as f32 / 300.0) - 0.5).collect();
        let mut writer = hound::WavWriter::create(&in_path, spec).unwrap();
        for s in &samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();

        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::LoadLoop {
            voice: 0,
            path: in_path,
            reply: Some(tx),
        });
        rx.recv().unwrap().unwrap();
        let len = setup
            .handle
            .get_control_value(ControlId::LoopLength, 0);
        assert_eq!((len * SR as f32).round() as usize, 300);

        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::SaveLoop {
            voice: 0,
            path: out_path.clone(),
            reply: Some(tx),
        });
        rx.recv().unwrap().unwrap();

        let mut reader = hound::WavReader::open(&out_path).unwrap();
        let read_back: Vec<f32> = reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read_back.len(), samples.len());
        for (a, b) in read_back.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_save_loop_without_audio_fails() {
        let mut setup = setup(1);
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::SaveLoop {
            voice: 0,
            path: dir.path().join("empty.wav"),
            reply: Some(tx),
        });
        assert!(matches!(rx.recv().unwrap(), Err(SessionError::EmptyLoop)));
    }

    #[test]
    fn test_session_round_trip_restores_voice_count() {
        let mut setup = setup(2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::SaveSession {
            path: path.clone(),
            reply: Some(tx),
        });
        rx.recv().unwrap().unwrap();

        setup
            .service
            .handle_event(EventNonRT::RemoveLoop {
                index: 1,
                reply: None,
            });
        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::Ping { reply: tx });
        assert_eq!(rx.recv().unwrap(), 1);

        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::LoadSession {
            path,
            reply: Some(tx),
        });
        rx.recv().unwrap().unwrap();

        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::Ping { reply: tx });
        assert_eq!(rx.recv().unwrap(), 2);
    }

    #[test]
    fn test_get_param_replies_with_snapshot_value() {
        let mut setup = setup(1);
        let (tx, rx) = bounded(1);
        setup.service.handle_event(EventNonRT::GetParam {
            voice: 0,
            control: ControlId::TotalTime,
            reply: tx,
        });
        let total = rx.recv().unwrap();
        // 1 second requested, rounded up to the power-of-two ring
        assert!(total >= 1.0);
    }
}
