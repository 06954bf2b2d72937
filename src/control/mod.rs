//! Stdin/stdout control channel so a desktop shell can drive the core.
//!
//! A dedicated thread reads newline-delimited JSON commands from stdin and
//! forwards them over a channel; the command loop applies them to the
//! application core and answers with events on stdout. Undecodable input
//! produces a recoverable error event and the loop keeps running.

mod protocol;

pub use protocol::{ControlCommand, ControlEvent};

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::app::{AppCore, AppError};
use crate::hub::BroadcastHub;
use crate::state::TransitionConfig;

pub fn spawn_stdin_reader(tx: Sender<ControlCommand>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        let stdin_lock = stdin.lock();

        for line in stdin_lock.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<ControlCommand>(trimmed) {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break; // Main thread has exited
                    }
                }
                Err(e) => {
                    send_event(&ControlEvent::Error {
                        message: format!("Invalid command: {e}"),
                        recoverable: true,
                    });
                }
            }
        }

        debug!("stdin reader thread exiting");
    })
}

pub fn send_event(event: &ControlEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let mut stdout = io::stdout().lock();
            if let Err(err) = writeln!(stdout, "{json}") {
                debug!("control event write failed: {err}");
                return;
            }
            if let Err(err) = stdout.flush() {
                debug!("control event flush failed: {err}");
            }
        }
        Err(err) => {
            debug!("control event serialization failed: {err}");
        }
    }
}

/// Drain commands until the stdin reader hangs up, emitting each response.
pub fn run_command_loop(app: &AppCore, hub: &Arc<BroadcastHub>, rx: Receiver<ControlCommand>) {
    while let Ok(cmd) = rx.recv() {
        send_event(&handle_command(app, hub, cmd));
    }
}

/// Apply one command and produce the event to answer it with.
pub fn handle_command(app: &AppCore, hub: &BroadcastHub, cmd: ControlCommand) -> ControlEvent {
    match cmd {
        ControlCommand::SetGroup { id } => match app.set_active_group(&id) {
            Ok(_) => group_list(app),
            Err(err) => recoverable(err),
        },
        ControlCommand::SetSpeaking { speaking } => {
            app.set_speaking(speaking);
            status(app, hub)
        }
        ControlCommand::SetTransition { style, duration } => {
            let current = app.config().get();
            app.set_transition(TransitionConfig {
                style,
                duration_ms: duration.unwrap_or(current.transition_duration),
            });
            status(app, hub)
        }
        ControlCommand::SetVoice { threshold, hold_ms } => {
            app.set_voice_params(threshold, hold_ms);
            status(app, hub)
        }
        ControlCommand::AddGroup {
            name,
            idle_image,
            speaking_image,
            hotkey,
        } => {
            app.add_group(name, idle_image, speaking_image, hotkey);
            group_list(app)
        }
        ControlCommand::UpdateGroup {
            id,
            name,
            idle_image,
            speaking_image,
            hotkey,
        } => {
            let result = app.update_group(&id, |group| {
                if let Some(name) = name {
                    group.name = name;
                }
                if let Some(idle) = idle_image {
                    group.idle_image = idle;
                }
                if let Some(speaking) = speaking_image {
                    group.speaking_image = speaking;
                }
                if let Some(hotkey) = hotkey {
                    group.hotkey = Some(hotkey);
                }
            });
            match result {
                Ok(_) => group_list(app),
                Err(err) => recoverable(err),
            }
        }
        ControlCommand::DeleteGroup { id } => match app.delete_group(&id) {
            Ok(()) => group_list(app),
            Err(err) => recoverable(err),
        },
        ControlCommand::GetStatus => status(app, hub),
    }
}

fn group_list(app: &AppCore) -> ControlEvent {
    let settings = app.config().get();
    ControlEvent::GroupList {
        groups: settings.groups,
        active_group_id: settings.active_group_id,
    }
}

fn status(app: &AppCore, hub: &BroadcastHub) -> ControlEvent {
    let settings = app.config().get();
    ControlEvent::Status {
        is_speaking: app.is_speaking(),
        active_group_id: settings.active_group_id,
        transition: settings.default_transition,
        transition_duration: settings.transition_duration,
        connected_overlays: hub.client_count(),
    }
}

fn recoverable(err: AppError) -> ControlEvent {
    ControlEvent::Error {
        message: err.to_string(),
        recoverable: true,
    }
}
