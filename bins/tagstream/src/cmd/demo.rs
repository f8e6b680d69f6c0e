use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tagstream_engine::{BROADCAST_TAG, Consumer, Handler, Message, Producer, Subscriber, Subscription};

use crate::config::DemoArgs;
use crate::error::CliError;

pub async fn run(config: Option<&str>, args: DemoArgs) -> Result<(), CliError> {
    let (config, backend) = super::load(config).await?;

    let mut consumers = Vec::new();
    let mut received = BTreeMap::new();
    for name in &args.consumers {
        let consumer = Consumer::new(&backend, &args.topic, name, config.stream.clone())?;
        let count = Arc::new(AtomicU64::new(0));
        let handler: Handler = {
            let count = count.clone();
            Arc::new(move |_: &Message, _: &dyn Subscription| {
                count.fetch_add(1, Ordering::Relaxed);
            })
        };
        consumer.set_handler(handler);
        consumer.subscribe().await?;
        received.insert(name.clone(), count);
        consumers.push(consumer);
    }

    let producer = Producer::new(&backend, &args.topic, config.stream.clone())?;
    producer.start().await?;

    let mut tags: Vec<&str> = args.consumers.iter().map(String::as_str).collect();
    tags.push(BROADCAST_TAG);
    let mut expected: BTreeMap<String, u64> = args.consumers.iter().map(|c| (c.clone(), 0)).collect();

    let started = Instant::now();
    let mut accepted = 0;
    for i in 0..args.messages {
        let Some(tag) = tags.choose(&mut rand::thread_rng()).copied() else {
            break;
        };
        let n = producer.publish(&i.to_string(), format!("demo message {i}"), &[tag]).await?;
        accepted += n;
        if n == 0 {
            continue;
        }
        for (name, count) in expected.iter_mut() {
            if tag == BROADCAST_TAG || tag == name.as_str() {
                *count += 1;
            }
        }
    }
    tracing::info!(published = args.messages, accepted, "publishing done");

    let total: u64 = expected.values().sum();
    super::wait_until(Duration::from_secs(60), || {
        received.values().map(|c| c.load(Ordering::Relaxed)).sum::<u64>() >= total
    })
    .await?;
    let elapsed = started.elapsed();

    println!("{:<16} {:>10} {:>10}", "consumer", "expected", "received");
    for (name, count) in &received {
        let want = expected.get(name).copied().unwrap_or_default();
        println!("{:<16} {:>10} {:>10}", name, want, count.load(Ordering::Relaxed));
    }
    println!("delivered {total} messages in {elapsed:.2?}");

    producer.shutdown().await;
    for consumer in &consumers {
        consumer.stop();
    }
    Ok(())
}
