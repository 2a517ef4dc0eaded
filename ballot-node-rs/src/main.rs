//! Ballot Node - election demo
//!
//! Runs a handful of candidates against in-process partitions, reshuffles
//! leadership, and prints every change an observer sees.

use ballot_core::{
    CandidateId, Election, ElectionConfig, ElectionEvent, ElectionService, MemoryController,
    NodeIdentity,
};
use clap::Parser;
use futures_util::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Ballot leader election demo node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host name used to derive candidate identities
    #[arg(short, long)]
    name: String,

    /// Election to run
    #[arg(short, long, default_value = "leader")]
    election: String,

    /// Number of partitions to route across
    #[arg(short, long, default_value = "3")]
    partitions: usize,

    /// Number of candidates to enter
    #[arg(short, long, default_value = "3")]
    candidates: usize,

    /// Print events as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Ballot node \"{}\" starting", args.name);

    let partitions: Vec<Arc<dyn ElectionService>> = (0..args.partitions)
        .map(|_| Arc::new(MemoryController::new()) as Arc<dyn ElectionService>)
        .collect();
    let identity = NodeIdentity::from_host(&args.name);
    let config = ElectionConfig::new(args.election.clone());

    let observer = Election::new(config.clone(), &partitions, identity.next_candidate()).await?;
    let (events_tx, mut events_rx) = mpsc::channel::<ElectionEvent>(64);
    let mut listener = observer.listen(events_tx).await?;

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            print_event(&event, json);
        }
    });

    let candidates = try_join_all(
        (0..args.candidates)
            .map(|_| Election::new(config.clone(), &partitions, identity.next_candidate())),
    )
    .await?;

    for candidate in &candidates {
        let term = candidate.enter().await?;
        info!("{} entered (term {})", candidate.id(), term.term);
    }

    if let Some(last) = candidates.last() {
        let id = last.id().clone();
        observer.promote(&id).await?;
        observer.anoint(&id).await?;
    }
    if let Some(first) = candidates.first() {
        let evicted = observer.evict(first.id()).await?;
        info!("Evicted {}: {}", first.id(), evicted);
    }

    // Step leaders down until nobody is left
    loop {
        let term = observer.get_term().await?;
        let Some(leader) = term.leader else {
            break;
        };
        match find(&candidates, &leader) {
            Some(candidate) => {
                candidate.leave().await?;
            }
            None => {
                warn!("Leader {} is not one of ours", leader);
                break;
            }
        }
    }

    // Let the listener drain before shutting down
    tokio::time::sleep(Duration::from_millis(100)).await;

    for candidate in &candidates {
        candidate.close().await?;
    }
    observer.delete().await?;
    info!("Listener finished: {:?}", listener.wait().await);

    drop(observer);
    let _ = printer.await;
    Ok(())
}

fn find<'a>(candidates: &'a [Election], id: &CandidateId) -> Option<&'a Election> {
    candidates.iter().find(|c| c.id() == id)
}

fn print_event(event: &ElectionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
        return;
    }

    let leader = event
        .term
        .leader
        .as_ref()
        .map(CandidateId::as_str)
        .unwrap_or("-");
    let candidates: Vec<&str> = event.term.candidates.iter().map(CandidateId::as_str).collect();
    println!(
        "{} term={} leader={} candidates=[{}]",
        event.event_type,
        event.term.term,
        leader,
        candidates.join(", ")
    );
}
