use std::sync::Arc;

use tagstream_engine::{Consumer, Group, Handler, Message, Subscriber, Subscription};

use crate::config::ConsumeArgs;
use crate::error::CliError;

fn printer() -> Handler {
    Arc::new(|msg: &Message, sub: &dyn Subscription| {
        println!(
            "[{}] {} tag={} {}",
            sub.full_name(),
            msg.id,
            msg.tag_id,
            String::from_utf8_lossy(&msg.payload)
        );
    })
}

pub async fn run(config: Option<&str>, args: ConsumeArgs) -> Result<(), CliError> {
    let (config, backend) = super::load(config).await?;

    let subscriber: Box<dyn Subscriber> = match &args.group {
        Some(group) => Box::new(Group::new(&backend, &args.topic, group, &args.name, config.stream).await?),
        None => Box::new(Consumer::new(&backend, &args.topic, &args.name, config.stream)?),
    };
    subscriber.set_handler(printer());
    subscriber.subscribe().await?;
    tracing::info!(topic = %args.topic, name = %subscriber.full_name(), "consuming, Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    subscriber.stop();
    Ok(())
}
