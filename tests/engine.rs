// tests/engine.rs

//! End-to-end checks driving the engine the way the platform binding does:
//! commands in through the controller, interleaved stereo blocks out of
//! `render`.

use groovebox::audio_engine::{AudioEngine, EngineController, RenderStatus};
use groovebox::looper::{LooperState, BEATS_PER_BAR, PRE_COUNT_BEATS};

const SR: f32 = 48_000.0;
const BLOCK_FRAMES: usize = 512;

fn render_block(engine: &mut AudioEngine) -> Vec<f32> {
    let mut buffer = vec![0.0f32; BLOCK_FRAMES * 2];
    assert_eq!(engine.render(&mut buffer), RenderStatus::Continue);
    buffer
}

fn render_until<F: Fn(&EngineController) -> bool>(
    engine: &mut AudioEngine,
    controller: &EngineController,
    max_blocks: usize,
    done: F,
) {
    for _ in 0..max_blocks {
        render_block(engine);
        if done(controller) {
            return;
        }
    }
    panic!("condition not reached within {} blocks", max_blocks);
}

#[test]
fn loop_record_playback_and_export() {
    let (mut engine, mut controller) = AudioEngine::new(SR);
    controller.set_bpm(120.0);
    controller.set_looper_bars(1);
    controller.note_on(60, 1.0);

    let samples_per_beat = (SR * 60.0 / 120.0) as usize;
    let loop_len = BEATS_PER_BAR * samples_per_beat;
    let pre_count = PRE_COUNT_BEATS * samples_per_beat;
    let blocks = |samples: usize| samples / BLOCK_FRAMES + 4;

    controller.start_looper_recording(0);
    render_until(&mut engine, &controller, blocks(pre_count), |c| {
        c.looper().state() == LooperState::Recording
    });

    render_until(&mut engine, &controller, blocks(loop_len), |c| {
        c.looper().state() == LooperState::Stopped
    });
    assert!(controller.looper().tracks[0].has_content());
    assert_eq!(controller.looper().loop_len_samples(), loop_len);

    controller.start_looper_playback();
    let before = controller.looper().playhead();
    render_block(&mut engine);
    assert_eq!(controller.looper().state(), LooperState::Playing);
    assert_ne!(controller.looper().playhead(), before);

    // The take captured the held synth note.
    let export = controller.export_mix(0b0001, false);
    assert_eq!(export.len(), loop_len * 2);
    assert!(
        export.iter().any(|s| s.abs() > 0.01),
        "exported loop is silent"
    );
}

#[test]
fn second_recording_inherits_the_locked_length() {
    let (mut engine, mut controller) = AudioEngine::new(SR);
    controller.set_bpm(120.0);
    controller.set_looper_bars(1);

    let samples_per_beat = (SR * 60.0 / 120.0) as usize;
    let loop_len = BEATS_PER_BAR * samples_per_beat;
    let cycle = (PRE_COUNT_BEATS * samples_per_beat + loop_len) / BLOCK_FRAMES + 8;

    controller.start_looper_recording(0);
    render_until(&mut engine, &controller, cycle, |c| {
        c.looper().state() == LooperState::Stopped
    });

    // Ask for a longer loop; the lock wins.
    controller.set_looper_bars(4);
    controller.start_looper_recording(1);
    render_until(&mut engine, &controller, cycle, |c| {
        c.looper().state() == LooperState::Stopped
    });
    assert_eq!(controller.looper().loop_len_samples(), loop_len);

    controller.clear_looper();
    render_block(&mut engine);
    assert_eq!(controller.looper().state(), LooperState::Idle);
    assert_eq!(controller.looper().loop_len_samples(), 0);
}

#[test]
fn drums_render_when_enabled() {
    let (mut engine, controller) = AudioEngine::new(SR);
    controller.set_drums_enabled(true);
    controller.set_bpm(100.0);

    let mut peak = 0.0f32;
    for _ in 0..100 {
        let buffer = render_block(&mut engine);
        for s in buffer {
            assert!(s.is_finite());
            assert!((-1.0..=1.0).contains(&s));
            peak = peak.max(s.abs());
        }
    }
    assert!(peak > 0.05, "drum machine made no sound ({})", peak);
}

#[test]
fn export_can_include_an_offline_drum_render() {
    let (mut engine, mut controller) = AudioEngine::new(SR);
    controller.set_bpm(120.0);
    controller.set_looper_bars(1);

    let samples_per_beat = (SR * 60.0 / 120.0) as usize;
    let loop_len = BEATS_PER_BAR * samples_per_beat;
    let cycle = (PRE_COUNT_BEATS * samples_per_beat + loop_len) / BLOCK_FRAMES + 8;

    controller.start_looper_recording(0);
    render_until(&mut engine, &controller, cycle, |c| {
        c.looper().state() == LooperState::Stopped
    });

    // Empty track subset, drums only: the render still fills the loop.
    let export = controller.export_mix(0, true);
    assert_eq!(export.len(), loop_len * 2);
    assert!(export.iter().any(|s| s.abs() > 0.05), "no drums in export");
    assert!(export.iter().all(|s| s.abs() <= 1.0));
}

#[test]
fn all_notes_off_lets_the_output_decay() {
    let (mut engine, mut controller) = AudioEngine::new(SR);
    for note in [48, 55, 60, 64] {
        controller.note_on(note, 1.0);
    }
    for _ in 0..20 {
        render_block(&mut engine);
    }

    controller.all_notes_off();
    // Default release is 0.2 s; give it a full second.
    for _ in 0..((SR as usize) / BLOCK_FRAMES) {
        render_block(&mut engine);
    }
    let tail = render_block(&mut engine);
    let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak < 1e-3, "output did not decay ({})", peak);
}
