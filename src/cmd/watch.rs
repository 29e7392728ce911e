use anyhow::Result;

use linecount::{ClientConfig, ClientNotification, LiveEventClient};

use super::output::{describe_event, print_json};
use crate::OutputFormat;

pub async fn cmd_watch(config: &ClientConfig, until_ended: bool, format: OutputFormat) -> Result<()> {
    let url = config.live_url()?;
    let mut client = LiveEventClient::websocket(url.as_str(), config.reconnect_policy());
    let mut notifications = client.subscribe();

    eprintln!("📡 Watching {url} (Ctrl-C to stop)");
    client.connect();

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                let ended = matches!(
                    &notification,
                    ClientNotification::Event(event) if event.is_terminal()
                );
                report_notification(&notification, format)?;
                if ended && until_ended {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n👋 Stopping");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

/// Events go to stdout, connection chatter to stderr.
pub fn report_notification(notification: &ClientNotification, format: OutputFormat) -> Result<()> {
    match notification {
        ClientNotification::Event(event) => {
            if format == OutputFormat::Json {
                print_json(event)?;
            } else {
                println!("{}", describe_event(event));
            }
        }
        ClientNotification::Opened => eprintln!("🔌 Live channel connected"),
        ClientNotification::Diagnostic(message) => eprintln!("⚠️  {message}"),
        ClientNotification::Closed {
            reconnect_in: Some(delay),
        } => eprintln!(
            "🔌 Live channel closed, reconnecting in {}s",
            delay.as_secs()
        ),
        ClientNotification::Closed { reconnect_in: None } => {
            eprintln!("🔌 Live channel closed");
        }
    }
    Ok(())
}
