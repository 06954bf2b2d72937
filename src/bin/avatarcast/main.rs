//! AvatarCast core entrypoint so capture, state, and broadcast start as one runtime.
//!
//! Owns the whole pipeline: microphone capture feeds the voice activity
//! detector, speaking edges update the authoritative state, and every change
//! is pushed to connected overlays. A desktop shell drives it over the
//! stdin/stdout control channel.
//!
//! # Architecture
//!
//! - Capture thread: owns the audio stream, publishes level/speaking events
//! - Control thread: reads newline-delimited JSON commands from stdin
//! - Server task: WebSocket subscriptions, state pull, asset files

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use avatarcast::cli::CliArgs;
use avatarcast::config::ConfigStore;
use avatarcast::control::{self, ControlEvent};
use avatarcast::protocol::OverlayMessage;
use avatarcast::telemetry;
use avatarcast::vad::{self, VadEvent, VadParams, VoiceActivityDetector};
use avatarcast::{AppCore, BroadcastHub, StateStore};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    telemetry::init_tracing(&args);

    if args.list_input_devices {
        return list_input_devices();
    }

    run(args)
}

fn list_input_devices() -> Result<()> {
    let devices = vad::list_input_devices().context("could not enumerate audio devices")?;
    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn run(args: CliArgs) -> Result<()> {
    let config = Arc::new(ConfigStore::load(args.config_dir.clone())?);
    apply_cli_overrides(&config, &args);
    let settings = config.get();

    let store = Arc::new(StateStore::new(settings.transition()));
    let hub = Arc::new(BroadcastHub::new(store.clone()));
    let vad_params = Arc::new(VadParams::new(
        settings.voice_threshold,
        settings.voice_hold_time,
    ));
    let app = Arc::new(AppCore::new(
        config.clone(),
        store.clone(),
        hub.clone(),
        vad_params.clone(),
    ));

    // Voice capture is best-effort: a missing microphone leaves the speaking
    // flag controllable over the control channel.
    let mut detector = None;
    let mut input_device = None;
    if !args.no_voice {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut vad = VoiceActivityDetector::new(vad_params.clone(), events_tx);
        let selector = args
            .input_device
            .clone()
            .or_else(|| settings.mic_device_id.clone());
        match vad.start(selector.as_deref()) {
            Ok(device) => {
                tracing::info!("listening on input device {device}");
                input_device = Some(device);
                spawn_vad_forwarder(app.clone(), events_rx);
                detector = Some(vad);
            }
            Err(err) => {
                tracing::warn!("voice detection unavailable: {err}");
            }
        }
    }

    let assets_dir = args
        .assets_dir
        .clone()
        .unwrap_or_else(|| config.assets_dir().to_path_buf());
    let port = args.port.unwrap_or(settings.server_port);
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let server = avatarcast::server::start(addr, store.clone(), hub.clone(), assets_dir)?;

    // Seed overlays that were already waiting for this process to come up.
    app.refresh();

    // The control channel is just another hub subscriber: every broadcast is
    // mirrored to the shell as a state_changed event.
    let (mirror_tx, mut mirror_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    hub.connect(mirror_tx);
    tokio::spawn(async move {
        while let Some(json) = mirror_rx.recv().await {
            if let Ok(OverlayMessage::State {
                data,
                transition,
                duration,
            }) = serde_json::from_str::<OverlayMessage>(&json)
            {
                control::send_event(&ControlEvent::StateChanged {
                    state: data,
                    transition,
                    duration,
                });
            }
        }
    });

    let (cmd_tx, cmd_rx) = mpsc::channel();
    control::spawn_stdin_reader(cmd_tx);
    let control_app = app.clone();
    let control_hub = hub.clone();
    thread::spawn(move || control::run_command_loop(&control_app, &control_hub, cmd_rx));

    let ready_settings = config.get();
    control::send_event(&ControlEvent::Ready {
        version: env!("CARGO_PKG_VERSION").to_string(),
        port: server.addr().port(),
        overlay_url: format!("http://{}", server.addr()),
        input_device,
        groups: ready_settings.groups,
        active_group_id: ready_settings.active_group_id,
    });

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for shutdown signal")?;
    tracing::info!("shutting down");

    if let Some(mut detector) = detector.take() {
        detector.stop();
    }
    hub.shutdown();
    server.shutdown().await?;
    Ok(())
}

/// CLI flags win over persisted settings.
fn apply_cli_overrides(config: &ConfigStore, args: &CliArgs) {
    if args.voice_threshold.is_none() && args.voice_hold_ms.is_none() {
        return;
    }
    config.update(|settings| {
        if let Some(threshold) = args.voice_threshold {
            settings.voice_threshold = threshold;
        }
        if let Some(hold) = args.voice_hold_ms {
            settings.voice_hold_time = hold;
        }
    });
}

fn spawn_vad_forwarder(
    app: Arc<AppCore>,
    events_rx: crossbeam_channel::Receiver<VadEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(event) = events_rx.recv() {
            match event {
                VadEvent::Speaking(speaking) => app.set_speaking(speaking),
                VadEvent::Level(level) => tracing::trace!(level, "mic level"),
            }
        }
    })
}
