// src/looper.rs

//! Multi-track, sample-accurate loop recorder and player.
//!
//! Four stereo tracks share one bar-locked loop length, fixed by the first
//! recording and released only when every track is cleared. All state
//! transitions happen on the audio thread inside `process_block`; the
//! control thread only requests them and observes progress through the
//! shared atomics.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use crate::synth::{load_param, store_param};

pub const MAX_TRACKS: usize = 4;
pub const PRE_COUNT_BEATS: usize = 4;
pub const BEATS_PER_BAR: usize = 4;
pub const MIN_BARS: usize = 1;
pub const MAX_BARS: usize = 8;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LooperState {
    Idle,
    PreCount,
    Recording,
    Playing,
    Stopped,
}

impl From<u8> for LooperState {
    fn from(val: u8) -> Self {
        match val {
            1 => LooperState::PreCount,
            2 => LooperState::Recording,
            3 => LooperState::Playing,
            4 => LooperState::Stopped,
            _ => LooperState::Idle,
        }
    }
}

/// Per-track state shared between the control and audio threads. Volume,
/// mute and solo are plain atomics the control thread writes directly; the
/// buffer lock is only contended during export.
#[derive(Clone)]
pub struct SharedTrack {
    /// Interleaved stereo samples, sized at recording start.
    pub buffer: Arc<RwLock<Vec<f32>>>,
    has_content: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    muted: Arc<AtomicBool>,
    soloed: Arc<AtomicBool>,
}

impl SharedTrack {
    fn new() -> Self {
        let volume = AtomicU32::new(0);
        store_param(&volume, 1.0);
        Self {
            buffer: Arc::new(RwLock::new(Vec::new())),
            has_content: Arc::new(AtomicBool::new(false)),
            volume: Arc::new(volume),
            muted: Arc::new(AtomicBool::new(false)),
            soloed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn has_content(&self) -> bool {
        self.has_content.load(Ordering::Relaxed)
    }

    pub fn volume(&self) -> f32 {
        load_param(&self.volume)
    }

    pub fn set_volume(&self, volume: f32) {
        store_param(&self.volume, volume.clamp(0.0, 1.0));
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed.load(Ordering::Relaxed)
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.soloed.store(soloed, Ordering::Relaxed);
    }
}

/// Transport state visible to the control thread.
#[derive(Clone)]
pub struct SharedLooperState {
    state: Arc<AtomicU8>,
    loop_len_samples: Arc<AtomicUsize>,
    playhead: Arc<AtomicUsize>,
    samples_per_beat: Arc<AtomicUsize>,
    pub tracks: [SharedTrack; MAX_TRACKS],
}

impl SharedLooperState {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(LooperState::Idle as u8)),
            loop_len_samples: Arc::new(AtomicUsize::new(0)),
            playhead: Arc::new(AtomicUsize::new(0)),
            samples_per_beat: Arc::new(AtomicUsize::new(0)),
            tracks: std::array::from_fn(|_| SharedTrack::new()),
        }
    }

    pub fn state(&self) -> LooperState {
        self.state.load(Ordering::Relaxed).into()
    }

    fn set_state(&self, state: LooperState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Locked loop length in samples per channel; 0 while unlocked.
    pub fn loop_len_samples(&self) -> usize {
        self.loop_len_samples.load(Ordering::Relaxed)
    }

    pub fn playhead(&self) -> usize {
        self.playhead.load(Ordering::Relaxed)
    }

    /// Beat within the bar at the current playhead, 0-based.
    pub fn current_beat(&self) -> usize {
        let spb = self.samples_per_beat.load(Ordering::Relaxed);
        if spb == 0 {
            return 0;
        }
        (self.playhead() / spb) % BEATS_PER_BAR
    }

    /// Bar at the current playhead, 0-based.
    pub fn current_bar(&self) -> usize {
        let spb = self.samples_per_beat.load(Ordering::Relaxed);
        if spb == 0 {
            return 0;
        }
        self.playhead() / (spb * BEATS_PER_BAR)
    }

    /// Mix a bitmask subset of tracks into a fresh interleaved stereo
    /// buffer. Control-thread only; takes the buffer read locks. Refused
    /// (empty) while a take is in flight, so the locks never contend with
    /// the recorder.
    pub fn export_mix(&self, track_mask: u8) -> Vec<f32> {
        if matches!(
            self.state(),
            LooperState::PreCount | LooperState::Recording
        ) {
            return Vec::new();
        }
        let len = self.loop_len_samples();
        let mut out = vec![0.0f32; len * 2];
        for (i, track) in self.tracks.iter().enumerate() {
            if track_mask & (1 << i) == 0 || !track.has_content() {
                continue;
            }
            let volume = track.volume();
            if let Ok(buffer) = track.buffer.read() {
                for (dst, src) in out.iter_mut().zip(buffer.iter()) {
                    *dst += src * volume;
                }
            }
        }
        for sample in &mut out {
            *sample = sample.clamp(-1.0, 1.0);
        }
        out
    }
}

pub struct Looper {
    shared: SharedLooperState,
    state: LooperState,
    sample_rate: f32,
    bpm: f32,
    bars: usize,
    loop_len: usize,
    position: usize,
    pre_count_remaining: usize,
    recording_track: Option<usize>,
}

impl Looper {
    pub fn new(sample_rate: f32) -> Self {
        let looper = Self {
            shared: SharedLooperState::new(),
            state: LooperState::Idle,
            sample_rate: sample_rate.max(1.0),
            bpm: 120.0,
            bars: 2,
            loop_len: 0,
            position: 0,
            pre_count_remaining: 0,
            recording_track: None,
        };
        looper
            .shared
            .samples_per_beat
            .store(looper.samples_per_beat(), Ordering::Relaxed);
        looper
    }

    pub fn shared(&self) -> SharedLooperState {
        self.shared.clone()
    }

    pub fn state(&self) -> LooperState {
        self.state
    }

    /// True while the metronome should be audible instead of the drums.
    pub fn is_count_or_record(&self) -> bool {
        matches!(self.state, LooperState::PreCount | LooperState::Recording)
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(crate::drum_machine::MIN_BPM, crate::drum_machine::MAX_BPM);
        self.shared
            .samples_per_beat
            .store(self.samples_per_beat(), Ordering::Relaxed);
    }

    pub fn set_bars(&mut self, bars: usize) {
        self.bars = bars.clamp(MIN_BARS, MAX_BARS);
    }

    fn samples_per_beat(&self) -> usize {
        (self.sample_rate * 60.0 / self.bpm) as usize
    }

    fn set_state(&mut self, state: LooperState) {
        self.state = state;
        self.shared.set_state(state);
    }

    /// Begin the pre-count for `track`. Rejected while another recording is
    /// in flight or the track already holds audio. While the loop length is
    /// locked, the configured bar count is ignored in favor of the locked
    /// length.
    pub fn start_recording(&mut self, track: usize) -> bool {
        if track >= MAX_TRACKS
            || self.recording_track.is_some()
            || self.shared.tracks[track].has_content()
        {
            return false;
        }

        if self.loop_len == 0 {
            self.loop_len = self.bars * BEATS_PER_BAR * self.samples_per_beat();
        }

        // Sized here, outside the steady-state render path.
        if let Ok(mut buffer) = self.shared.tracks[track].buffer.write() {
            buffer.clear();
            buffer.resize(self.loop_len * 2, 0.0);
        } else {
            return false;
        }

        self.recording_track = Some(track);
        self.pre_count_remaining = PRE_COUNT_BEATS * self.samples_per_beat();
        self.set_state(LooperState::PreCount);
        true
    }

    /// Abandon an in-flight pre-count or recording, discarding the audio.
    pub fn cancel_recording(&mut self) {
        if self.recording_track.take().is_some() {
            let fallback = if self.any_content() {
                LooperState::Stopped
            } else {
                self.loop_len = 0;
                self.shared.loop_len_samples.store(0, Ordering::Relaxed);
                LooperState::Idle
            };
            self.set_state(fallback);
        }
    }

    fn any_content(&self) -> bool {
        self.shared.tracks.iter().any(|t| t.has_content())
    }

    pub fn start_playback(&mut self) -> bool {
        if self.state != LooperState::Stopped || !self.any_content() {
            return false;
        }
        self.position = 0;
        self.set_state(LooperState::Playing);
        true
    }

    pub fn stop_playback(&mut self) {
        if self.state == LooperState::Playing {
            self.set_state(LooperState::Stopped);
        }
    }

    pub fn clear_track(&mut self, track: usize) {
        if track >= MAX_TRACKS {
            return;
        }
        self.shared.tracks[track]
            .has_content
            .store(false, Ordering::Relaxed);
        if let Ok(mut buffer) = self.shared.tracks[track].buffer.write() {
            buffer.fill(0.0);
        }
        if !self.any_content() {
            self.clear_all();
        }
    }

    /// Clear every track and unlock the loop length.
    pub fn clear_all(&mut self) {
        for track in &self.shared.tracks {
            track.has_content.store(false, Ordering::Relaxed);
            if let Ok(mut buffer) = track.buffer.write() {
                buffer.clear();
            }
        }
        self.loop_len = 0;
        self.position = 0;
        self.recording_track = None;
        self.shared.loop_len_samples.store(0, Ordering::Relaxed);
        self.set_state(LooperState::Idle);
    }

    /// Record `input` and accumulate loop playback into `output`, both
    /// interleaved stereo of equal length.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        let frames = input.len().min(output.len()) / 2;
        if frames == 0 || self.state == LooperState::Idle || self.state == LooperState::Stopped {
            return;
        }

        // Per-block control snapshot.
        let mut volumes = [0.0f32; MAX_TRACKS];
        let mut playable = [false; MAX_TRACKS];
        let any_solo = self.shared.tracks.iter().any(|t| t.is_soloed());
        for (i, track) in self.shared.tracks.iter().enumerate() {
            volumes[i] = track.volume();
            playable[i] = track.has_content()
                && !track.is_muted()
                && (!any_solo || track.is_soloed())
                && Some(i) != self.recording_track;
        }

        let buffers: [Arc<RwLock<Vec<f32>>>; MAX_TRACKS] =
            std::array::from_fn(|i| self.shared.tracks[i].buffer.clone());
        // The control thread only holds these locks while exporting; if it
        // does, this block simply skips the contended track.
        let mut guards: [Option<RwLockWriteGuard<Vec<f32>>>; MAX_TRACKS] =
            std::array::from_fn(|i| buffers[i].try_write().ok());

        for frame in 0..frames {
            let in_l = input[frame * 2];
            let in_r = input[frame * 2 + 1];

            if self.state == LooperState::PreCount {
                self.pre_count_remaining = self.pre_count_remaining.saturating_sub(1);
                if self.pre_count_remaining == 0 {
                    self.position = 0;
                    self.set_state(LooperState::Recording);
                    // Record this very sample.
                    self.write_and_mix(in_l, in_r, &mut guards, &volumes, &playable, output, frame);
                    continue;
                }
                // Existing tracks keep playing for context during the count.
                if self.any_content() {
                    self.mix_playback(&guards, &volumes, &playable, output, frame);
                    self.advance();
                }
                continue;
            }

            match self.state {
                LooperState::Recording => {
                    self.write_and_mix(in_l, in_r, &mut guards, &volumes, &playable, output, frame);
                }
                LooperState::Playing => {
                    self.mix_playback(&guards, &volumes, &playable, output, frame);
                    self.advance();
                }
                _ => {}
            }
        }

        self.shared.playhead.store(self.position, Ordering::Relaxed);
    }

    #[inline]
    fn advance(&mut self) {
        self.position += 1;
        if self.loop_len > 0 && self.position >= self.loop_len {
            self.position = 0;
        }
    }

    #[inline]
    fn mix_playback(
        &self,
        guards: &[Option<RwLockWriteGuard<Vec<f32>>>; MAX_TRACKS],
        volumes: &[f32; MAX_TRACKS],
        playable: &[bool; MAX_TRACKS],
        output: &mut [f32],
        frame: usize,
    ) {
        let index = self.position * 2;
        for i in 0..MAX_TRACKS {
            if !playable[i] {
                continue;
            }
            if let Some(buffer) = &guards[i] {
                if index + 1 < buffer.len() {
                    output[frame * 2] += buffer[index] * volumes[i];
                    output[frame * 2 + 1] += buffer[index + 1] * volumes[i];
                }
            }
        }
    }

    #[inline]
    #[allow(clippy::too_many_arguments)]
    fn write_and_mix(
        &mut self,
        in_l: f32,
        in_r: f32,
        guards: &mut [Option<RwLockWriteGuard<Vec<f32>>>; MAX_TRACKS],
        volumes: &[f32; MAX_TRACKS],
        playable: &[bool; MAX_TRACKS],
        output: &mut [f32],
        frame: usize,
    ) {
        if let Some(track) = self.recording_track {
            match &mut guards[track] {
                Some(buffer) => {
                    let index = self.position * 2;
                    if index + 1 < buffer.len() {
                        buffer[index] = in_l;
                        buffer[index + 1] = in_r;
                    }
                }
                // The control thread holds this buffer; holding the
                // position beats recording a silent hole.
                None => return,
            }
        }
        self.mix_playback(&*guards, volumes, playable, output, frame);

        self.position += 1;
        if self.position >= self.loop_len {
            // Loop complete: lock the length and keep the take.
            if let Some(track) = self.recording_track.take() {
                self.shared.tracks[track]
                    .has_content
                    .store(true, Ordering::Relaxed);
            }
            self.shared
                .loop_len_samples
                .store(self.loop_len, Ordering::Relaxed);
            self.position = 0;
            self.set_state(LooperState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;
    const BLOCK: usize = 256;

    fn run_block(looper: &mut Looper, value: f32) -> Vec<f32> {
        let input = vec![value; BLOCK * 2];
        let mut output = vec![0.0f32; BLOCK * 2];
        looper.process_block(&input, &mut output);
        output
    }

    fn run_samples(looper: &mut Looper, value: f32, samples: usize) {
        let mut remaining = samples;
        while remaining > 0 {
            let n = remaining.min(BLOCK);
            let input = vec![value; n * 2];
            let mut output = vec![0.0f32; n * 2];
            looper.process_block(&input, &mut output);
            remaining -= n;
        }
    }

    fn one_bar_looper() -> Looper {
        let mut looper = Looper::new(SR);
        looper.set_bpm(120.0);
        looper.set_bars(1);
        looper
    }

    #[test]
    fn full_recording_walk() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;

        assert!(looper.start_recording(0));
        assert_eq!(looper.state(), LooperState::PreCount);

        run_samples(&mut looper, 0.25, PRE_COUNT_BEATS * spb);
        assert_eq!(looper.state(), LooperState::Recording);

        run_samples(&mut looper, 0.25, loop_len);
        assert_eq!(looper.state(), LooperState::Stopped);
        assert!(looper.shared.tracks[0].has_content());
        assert_eq!(looper.shared().loop_len_samples(), loop_len);
    }

    #[test]
    fn loop_length_stays_locked_until_clear_all() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;

        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.5, PRE_COUNT_BEATS * spb + loop_len);
        assert_eq!(looper.state(), LooperState::Stopped);

        // A second recording asking for more bars still gets the locked
        // length.
        looper.set_bars(4);
        assert!(looper.start_recording(1));
        run_samples(&mut looper, 0.5, PRE_COUNT_BEATS * spb + loop_len);
        assert_eq!(looper.state(), LooperState::Stopped);
        assert_eq!(looper.shared().loop_len_samples(), loop_len);

        looper.clear_all();
        assert_eq!(looper.state(), LooperState::Idle);
        assert_eq!(looper.shared().loop_len_samples(), 0);
        assert!(!looper.shared.tracks[0].has_content());
    }

    #[test]
    fn recording_requires_empty_track_and_no_recording_in_flight() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();

        assert!(looper.start_recording(0));
        // Already recording.
        assert!(!looper.start_recording(1));

        run_samples(&mut looper, 0.1, (PRE_COUNT_BEATS + BEATS_PER_BAR) * spb);
        assert_eq!(looper.state(), LooperState::Stopped);
        // Track 0 now has content.
        assert!(!looper.start_recording(0));
        assert!(looper.start_recording(1));
    }

    #[test]
    fn playback_reproduces_the_recording() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;

        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.25, PRE_COUNT_BEATS * spb + loop_len);

        assert!(looper.start_playback());
        assert_eq!(looper.state(), LooperState::Playing);
        let out = run_block(&mut looper, 0.0);
        assert!((out[0] - 0.25).abs() < 1e-6, "got {}", out[0]);
        assert!((out[1] - 0.25).abs() < 1e-6);

        // Position wraps at the loop boundary.
        run_samples(&mut looper, 0.0, loop_len);
        assert_eq!(looper.state(), LooperState::Playing);
        let out = run_block(&mut looper, 0.0);
        assert!((out[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn mute_and_solo_gate_the_mix() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;

        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.25, PRE_COUNT_BEATS * spb + loop_len);
        assert!(looper.start_recording(1));
        run_samples(&mut looper, 0.5, PRE_COUNT_BEATS * spb + loop_len);

        assert!(looper.start_playback());
        let out = run_block(&mut looper, 0.0);
        assert!((out[0] - 0.75).abs() < 1e-6, "both tracks: {}", out[0]);

        looper.shared.tracks[0].set_muted(true);
        let out = run_block(&mut looper, 0.0);
        assert!((out[0] - 0.5).abs() < 1e-6, "track 0 muted: {}", out[0]);

        looper.shared.tracks[0].set_muted(false);
        looper.shared.tracks[0].set_soloed(true);
        let out = run_block(&mut looper, 0.0);
        assert!((out[0] - 0.25).abs() < 1e-6, "track 0 solo: {}", out[0]);
    }

    #[test]
    fn export_mixes_the_requested_subset() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;

        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.25, PRE_COUNT_BEATS * spb + loop_len);
        assert!(looper.start_recording(1));
        run_samples(&mut looper, 0.5, PRE_COUNT_BEATS * spb + loop_len);

        let shared = looper.shared();
        let both = shared.export_mix(0b11);
        assert_eq!(both.len(), loop_len * 2);
        assert!((both[0] - 0.75).abs() < 1e-6);

        let only_second = shared.export_mix(0b10);
        assert!((only_second[0] - 0.5).abs() < 1e-6);

        let none = shared.export_mix(0);
        assert!(none.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn export_is_refused_while_a_take_is_in_flight() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;
        let shared = looper.shared();

        assert!(looper.start_recording(0));
        assert!(shared.export_mix(0b01).is_empty(), "export during pre-count");

        run_samples(&mut looper, 0.25, PRE_COUNT_BEATS * spb + 10);
        assert_eq!(looper.state(), LooperState::Recording);
        assert!(shared.export_mix(0b01).is_empty(), "export during recording");

        run_samples(&mut looper, 0.25, loop_len);
        assert_eq!(looper.state(), LooperState::Stopped);
        assert_eq!(shared.export_mix(0b01).len(), loop_len * 2);
    }

    #[test]
    fn recording_stalls_instead_of_punching_a_hole() {
        let mut looper = one_bar_looper();
        let spb = looper.samples_per_beat();
        let loop_len = BEATS_PER_BAR * spb;
        let shared = looper.shared();

        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.25, PRE_COUNT_BEATS * spb);
        assert_eq!(looper.state(), LooperState::Recording);
        run_samples(&mut looper, 0.25, 100);

        // Someone holds the buffer lock; the take must neither advance nor
        // record silence.
        let before = shared.playhead();
        {
            let _hold = shared.tracks[0].buffer.read().unwrap();
            run_samples(&mut looper, 0.9, 64);
        }
        assert_eq!(shared.playhead(), before, "position moved while stalled");

        run_samples(&mut looper, 0.25, loop_len);
        assert_eq!(looper.state(), LooperState::Stopped);
        let export = shared.export_mix(0b01);
        assert!(
            export.iter().all(|&s| (s - 0.25).abs() < 1e-6),
            "take has a hole"
        );
    }

    #[test]
    fn shared_state_reports_beats_and_bars() {
        let mut looper = Looper::new(SR);
        looper.set_bpm(120.0);
        looper.set_bars(2);
        let spb = looper.samples_per_beat();
        let shared = looper.shared();

        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.1, PRE_COUNT_BEATS * spb);
        assert_eq!(shared.current_beat(), 0);
        assert_eq!(shared.current_bar(), 0);

        run_samples(&mut looper, 0.1, spb);
        assert_eq!(shared.current_beat(), 1);
        assert_eq!(shared.current_bar(), 0);

        run_samples(&mut looper, 0.1, 4 * spb);
        assert_eq!(shared.current_beat(), 1);
        assert_eq!(shared.current_bar(), 1);
    }

    #[test]
    fn cancel_discards_the_take() {
        let mut looper = one_bar_looper();
        assert!(looper.start_recording(0));
        run_samples(&mut looper, 0.25, 1_000);
        looper.cancel_recording();
        assert_eq!(looper.state(), LooperState::Idle);
        assert!(!looper.shared.tracks[0].has_content());
        assert_eq!(looper.shared().loop_len_samples(), 0);
        // A fresh recording may pick a new length.
        assert!(looper.start_recording(0));
    }
}
