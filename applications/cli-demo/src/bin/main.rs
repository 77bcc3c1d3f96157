//! Subscribe to a topic, publish to it once and log everything the broker sends.
//!
//! Configuration comes from `MQTT_*` variables, read from the environment or
//! a `.env` file. `MQTT_DEMO_TOPIC` picks the topic (default `test`).
//! Ctrl-C ends the session with a DISCONNECT.

use std::process::ExitCode;

use libmqtt::network::Tcp;
use libmqtt::network::application::mqtt::{Client, Options, Request};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_subscriber("info");

    let options = Options::from_env();
    let topic = std::env::var("MQTT_DEMO_TOPIC").unwrap_or_else(|_| "test".to_owned());

    let interrupt = CancellationToken::new();
    let on_signal = interrupt.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            return;
        }
        on_signal.cancel();
    });

    info!(broker = %options.broker, client_id = %options.client_id, "connecting");
    let mut client = match Client::dial(&mut Tcp { nodelay: true }, options, interrupt).await {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "dial failed");
            return ExitCode::FAILURE;
        }
    };

    let requests = [
        Request::subscribe(topic.clone()),
        Request::publish(topic, "hello w0rld"),
    ];
    for request in requests {
        if client.send(request).await.is_err() {
            break;
        }
    }

    let mut code = ExitCode::SUCCESS;
    while let Some(response) = client.recv().await {
        match (&response.error, response.is_notice()) {
            (Some(err), _) => {
                error!(error = %err, "session ended");
                code = ExitCode::FAILURE;
            }
            (None, true) => info!(notice = %response.message),
            (None, false) => info!(topic = %response.topic, message = %response.message, "received"),
        }
    }
    code
}
