use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tagstream_engine::{Group, Handler, Message, Producer, Subscriber, Subscription};

use crate::config::BenchArgs;
use crate::error::CliError;

/// Per-message delivery counters of one group, indexed by message id.
struct Tally {
    name: String,
    hits: Vec<AtomicU32>,
}

impl Tally {
    fn new(name: String, messages: usize) -> Self {
        Self {
            name,
            hits: (0..messages).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn record(&self, msg: &Message) {
        match msg.id.parse::<usize>().ok().and_then(|i| self.hits.get(i)) {
            Some(hit) => {
                hit.fetch_add(1, Ordering::Relaxed);
            }
            None => tracing::warn!(group = %self.name, id = %msg.id, "unexpected message id"),
        }
    }

    /// `(delivered, duplicated, missing)`
    fn summary(&self) -> (u64, usize, usize) {
        let mut delivered = 0;
        let (mut duplicated, mut missing) = (0, 0);
        for hit in &self.hits {
            let n = hit.load(Ordering::Relaxed);
            delivered += u64::from(n);
            match n {
                0 => missing += 1,
                1 => {}
                _ => duplicated += 1,
            }
        }
        (delivered, duplicated, missing)
    }
}

pub async fn run(config: Option<&str>, args: BenchArgs) -> Result<(), CliError> {
    let (config, backend) = super::load(config).await?;
    let total = Arc::new(AtomicU64::new(0));

    let mut members = Vec::new();
    let mut tallies = Vec::new();
    for g in 0..args.groups {
        let group = format!("g{g}");
        let tally = Arc::new(Tally::new(group.clone(), args.messages));
        for m in 0..args.members {
            let member = Group::new(&backend, &args.topic, &group, &format!("m{m}"), config.stream.clone()).await?;
            let handler: Handler = {
                let tally = tally.clone();
                let total = total.clone();
                Arc::new(move |msg: &Message, _: &dyn Subscription| {
                    tally.record(msg);
                    total.fetch_add(1, Ordering::Relaxed);
                })
            };
            member.set_handler(handler);
            member.subscribe().await?;
            members.push(member);
        }
        tallies.push(tally);
    }

    let producer = Producer::new(&backend, &args.topic, config.stream.clone())?;
    producer.start().await?;

    let started = Instant::now();
    let mut accepted = 0usize;
    for i in 0..args.messages {
        accepted += producer.publish(&i.to_string(), "bench", &[]).await?;
    }
    let published_in = started.elapsed();
    tracing::info!(accepted, elapsed = ?published_in, "publishing done");

    let expected = (accepted * args.groups) as u64;
    super::wait_until(Duration::from_secs(300), || total.load(Ordering::Relaxed) >= expected).await?;
    let elapsed = started.elapsed();

    println!("{:<8} {:>10} {:>10} {:>10}", "group", "delivered", "duplicate", "missing");
    for tally in &tallies {
        let (delivered, duplicated, missing) = tally.summary();
        println!("{:<8} {:>10} {:>10} {:>10}", tally.name, delivered, duplicated, missing);
    }
    let rate = expected as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("{expected} deliveries in {elapsed:.2?} ({rate:.0}/s), publish took {published_in:.2?}");

    producer.shutdown().await;
    for member in &members {
        member.stop();
    }
    Ok(())
}
