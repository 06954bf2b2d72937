//! Optional local telemetry logging used for debugging and performance triage.

use crate::cli::CliArgs;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn tracing_log_path() -> PathBuf {
    env::var("AVATARCAST_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("avatarcast_trace.jsonl"))
}

#[inline]
fn file_tracing_enabled(args: &CliArgs) -> bool {
    args.logs && !args.no_logs
}

fn init_tracing_once(args: &CliArgs, once: &OnceLock<()>) {
    let _ = once.get_or_init(|| {
        if file_tracing_enabled(args) {
            let path = tracing_log_path();
            let file = match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => file,
                Err(_) => return,
            };
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(file)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        } else if !args.no_logs {
            // Control events own stdout, so human-readable logs go to stderr.
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .try_init();
        }
    });
}

pub fn init_tracing(args: &CliArgs) {
    init_tracing_once(args, &TRACING_INIT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn test_args() -> CliArgs {
        CliArgs::parse_from(["telemetry-test"])
    }

    fn unique_trace_path(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        env::temp_dir().join(format!("avatarcast-trace-{suffix}-{nanos}.jsonl"))
    }

    #[test]
    fn tracing_log_path_prefers_env_override() {
        let _guard = env_lock().lock().expect("env lock");
        let path = unique_trace_path("env");
        env::set_var("AVATARCAST_TRACE_LOG", &path);
        assert_eq!(tracing_log_path(), path);
        env::remove_var("AVATARCAST_TRACE_LOG");
    }

    #[test]
    fn tracing_log_path_defaults_to_temp_dir_when_env_missing() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("AVATARCAST_TRACE_LOG");
        let expected = env::temp_dir().join("avatarcast_trace.jsonl");
        assert_eq!(tracing_log_path(), expected);
    }

    #[test]
    fn file_tracing_enabled_truth_table() {
        let mut args = test_args();
        args.logs = false;
        args.no_logs = false;
        assert!(!file_tracing_enabled(&args));

        args.logs = true;
        assert!(file_tracing_enabled(&args));

        args.no_logs = true;
        assert!(!file_tracing_enabled(&args));
    }

    #[test]
    fn init_tracing_once_creates_the_trace_file_when_enabled() {
        let _guard = env_lock().lock().expect("env lock");

        let enabled_path = unique_trace_path("enabled");
        let _ = fs::remove_file(&enabled_path);
        env::set_var("AVATARCAST_TRACE_LOG", &enabled_path);
        let enabled_once = OnceLock::new();
        let mut enabled_args = test_args();
        enabled_args.logs = true;
        enabled_args.no_logs = false;
        init_tracing_once(&enabled_args, &enabled_once);
        assert!(
            enabled_path.exists(),
            "enabled args should create trace file"
        );

        let disabled_path = unique_trace_path("disabled");
        let _ = fs::remove_file(&disabled_path);
        env::set_var("AVATARCAST_TRACE_LOG", &disabled_path);
        let disabled_once = OnceLock::new();
        let mut disabled_args = test_args();
        disabled_args.logs = false;
        disabled_args.no_logs = true;
        init_tracing_once(&disabled_args, &disabled_once);
        assert!(
            !disabled_path.exists(),
            "disabled args should not create trace file"
        );

        env::remove_var("AVATARCAST_TRACE_LOG");
        let _ = fs::remove_file(enabled_path);
        let _ = fs::remove_file(disabled_path);
    }
}
