use anyhow::{bail, Context, Result};
use nova_apns_client::{ApnsClient, ApnsConfig, IosPayload, Notification, Priority, PushType};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Send one alert notification using `APNS_*` settings from the environment.
///
/// Usage: nova-apns-push <device-token> <message>
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nova_apns_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(device_token), Some(message)) = (args.next(), args.next()) else {
        bail!("usage: nova-apns-push <device-token> <message>");
    };
    let topic = std::env::var("APNS_TOPIC").context("APNS_TOPIC must be set")?;

    let config = ApnsConfig::from_env()?;
    let client = ApnsClient::new(config)?;

    let payload = IosPayload::new().alert(message).sound("default");
    let notification = Notification::from_payload(&payload)?
        .topic(topic)
        .push_type(PushType::Alert)
        .priority(Priority::High);

    let result = client.push(&notification, &device_token).await;
    client.close();

    result.context("push failed")?;
    tracing::info!("Notification delivered");
    Ok(())
}
