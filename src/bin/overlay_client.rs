//! Headless overlay client for terminals and scripting.
//!
//! Subscribes to a running AvatarCast server and prints every render change
//! as one line, which makes it handy for checking what a browser overlay
//! would be showing without opening one.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use avatarcast::overlay::OverlayClient;

#[derive(Debug, Parser)]
#[command(
    name = "avatarcast-overlay",
    version,
    about = "Terminal subscriber for an AvatarCast overlay server"
)]
struct OverlayArgs {
    /// Server to subscribe to.
    #[arg(long, default_value = "127.0.0.1:7474")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = OverlayArgs::parse();
    let mut client = OverlayClient::new(args.server);
    client
        .run(|element| {
            let image = element.src().unwrap_or("(none)");
            let class = element.transition_class().unwrap_or_default();
            if element.visible() {
                println!("showing {image} {class}");
            } else {
                println!("hiding {image} {class}");
            }
        })
        .await;
    Ok(())
}
