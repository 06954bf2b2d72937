//! Command-line flags for the core process.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "avatarcast",
    version,
    about = "Voice-reactive avatar broadcaster for streaming overlays"
)]
pub struct CliArgs {
    /// Port for the overlay server; overrides the configured port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding config.json; defaults to the platform config dir.
    #[arg(long, env = "AVATARCAST_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Directory served under /assets/; defaults to <config-dir>/assets.
    #[arg(long)]
    pub assets_dir: Option<PathBuf>,

    /// Microphone device name; substring match, default input device otherwise.
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print available input devices and exit.
    #[arg(long)]
    pub list_input_devices: bool,

    /// Voice level threshold (0-100); overrides the configured value.
    #[arg(long)]
    pub voice_threshold: Option<f32>,

    /// Silence hold before the speaking flag drops, in milliseconds.
    #[arg(long)]
    pub voice_hold_ms: Option<u64>,

    /// Run without audio capture; speaking is driven over the control channel.
    #[arg(long)]
    pub no_voice: bool,

    /// Write JSON trace logs to the trace file.
    #[arg(long)]
    pub logs: bool,

    /// Suppress trace logging even when --logs is set.
    #[arg(long)]
    pub no_logs: bool,
}
