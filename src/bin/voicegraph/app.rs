//! Player - wires the voice pool to an output device and runs the control loop

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::RingBuffer;

use voicegraph::component::loader::MemorySampleLibrary;
use voicegraph::component::ComponentRegistry;
use voicegraph::graph;
use voicegraph::synth::{
    ChainConfiguration, NoteMessage, PoolEvent, VoiceBuilder, VoicePool, VoicePreset,
};
use voicegraph::{EngineConfig, MAX_BLOCK_SIZE};

use super::arpeggio::Arpeggio;

/// How often the control loop drains notes and reaps voices.
const TICK: Duration = Duration::from_millis(5);

pub struct Player {
    config: EngineConfig,
    chain: ChainConfiguration,
    preset: VoicePreset,
}

impl Player {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            chain: ChainConfiguration::standard(),
            preset: VoicePreset::standard(),
        }
    }

    pub fn preset(mut self, preset: VoicePreset) -> Self {
        self.preset = preset;
        self
    }

    /// Play `arpeggio` to the default output device, then let the tails ring
    /// out and tear everything down.
    pub fn play(self, arpeggio: Arpeggio) -> EyreResult<()> {
        self.config.validate().wrap_err("invalid engine config")?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| eyre!("no default output device available"))?;
        let stream_config = device
            .default_output_config()
            .wrap_err("failed to fetch default output config")?;

        let sample_rate = stream_config.sample_rate().0 as f32;
        let channels = stream_config.channels() as usize;
        if (sample_rate - self.config.sample_rate).abs() > f32::EPSILON {
            log::info!(
                "device runs at {sample_rate} Hz, not the configured {} Hz",
                self.config.sample_rate
            );
        }

        println!("=== voicegraph ===");
        println!("Sample rate: {} Hz", sample_rate);
        println!("Channels: {}", channels);
        println!("Polyphony: {}", self.config.polyphony);
        println!();

        let (mut context, mut renderer) = graph::channel(sample_rate, self.config.queue_capacity);

        let mut render_buf = vec![0.0f32; MAX_BLOCK_SIZE];
        let stream = device.build_output_stream(
            &stream_config.into(),
            move |data: &mut [f32], _| {
                let total_frames = data.len() / channels;
                let mut frames_written = 0;

                while frames_written < total_frames {
                    let frames = (total_frames - frames_written).min(MAX_BLOCK_SIZE);
                    let block = &mut render_buf[..frames];
                    renderer.render_block(block);

                    // Mono to every channel
                    let out_off = frames_written * channels;
                    for (i, &s) in block.iter().enumerate() {
                        for ch in 0..channels {
                            data[out_off + i * channels + ch] = s;
                        }
                    }
                    frames_written += frames;
                }
            },
            |err| log::error!("audio stream error: {err}"),
            None,
        )?;
        stream.play()?;

        let registry = ComponentRegistry::standard(Arc::new(MemorySampleLibrary::new()));
        let builder = VoiceBuilder::new(Arc::new(registry), Arc::new(self.chain));
        let mut pool = VoicePool::new(self.config, builder, Arc::new(self.preset));
        pool.ensure_initialized(&mut context)
            .wrap_err("initializing voice pool")?;

        let (tx, mut rx) = RingBuffer::<NoteMessage>::new(pool.config().queue_capacity);
        let length = arpeggio.duration();
        let source = arpeggio.spawn(tx);

        println!("Playing for {:.1}s...", length.as_secs_f64());
        let started = Instant::now();
        while !source.is_finished() || started.elapsed() < length {
            pool.process_messages(&mut context, &mut rx);
            pool.poll(&mut context);
            for event in pool.drain_events() {
                match event {
                    PoolEvent::Stolen { victim, by } => log::info!("{victim} stolen by {by}"),
                    PoolEvent::BuildFailed { handle, error } => log::warn!("{handle}: {error}"),
                    PoolEvent::StateChanged { handle, from, to } => {
                        log::trace!("{handle}: {from:?} -> {to:?}")
                    }
                }
            }
            context.collect_garbage();
            thread::sleep(TICK);
        }
        if source.join().is_err() {
            log::warn!("note source thread panicked");
        }
        pool.process_messages(&mut context, &mut rx);

        // Let release and delay tails finish before tearing down.
        let tail = Instant::now() + Duration::from_secs(2);
        while pool.active_count() > 0 && Instant::now() < tail {
            pool.poll(&mut context);
            context.collect_garbage();
            thread::sleep(TICK);
        }
        pool.teardown(&mut context);
        thread::sleep(Duration::from_millis(100));
        let freed = context.collect_garbage();
        log::debug!("freed {freed} node slots, {} still live", context.live_count());

        println!("Done.");
        Ok(())
    }
}
