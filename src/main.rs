use std::error::Error;

use clap::Parser;
use log::{info, LevelFilter};
use tokio::net::TcpListener;

use chordify::node::NodeRef;
use chordify::threads::chord::ChordService;
use chordify::threads::join::process_node_join;
use chordify::threads::tcp_service::serve;
use chordify::utils::cli::Cli;
use chordify::utils::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    simple_logger::SimpleLogger::new()
        .env()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    let node = NodeRef::new(&args.ip, args.port);
    info!("Starting node {} at ring position {}", node, node.id);

    let listener = TcpListener::bind((args.ip.as_str(), args.port)).await?;
    let service = ChordService::new(node, config);

    let mut thread_handles = Vec::new();

    info!("Starting up tcp main thread on {}:{}", args.ip, args.port);
    let server_service = service.clone();
    thread_handles.push(tokio::spawn(async move {
        serve(server_service, listener).await;
    }));

    match args.peer {
        Some(peer) => {
            let join_service = service.clone();
            thread_handles.push(tokio::spawn(async move {
                process_node_join(&join_service, &peer).await.unwrap();
            }));
        }
        None => info!("Starting up a new cluster"),
    }

    for handle in thread_handles {
        handle.await?;
    }

    Ok(())
}
