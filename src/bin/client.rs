use std::error::Error;
use std::io::Write;

use clap::Parser;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use chordify::net;
use chordify::proto::{Message, Origin};
use chordify::utils::constants::REQUEST_TIMEOUT_MILLIS;
use chordify::utils::types::Address;

/// Interactive command-line client for a chordify node.
#[derive(Parser, Debug)]
#[command(name = "chordify-client", about = "Interactive client for a chordify node")]
struct ClientCli {
    /// IP of the node to connect to
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Port of the node to connect to
    #[arg(long)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = ClientCli::parse();
    let addr: Address = format!("{}:{}", args.ip, args.port);

    println!("Chordify CLI connected to {}", addr);
    println!("Type 'help' for commands.\n");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!("\nExiting.");
            break;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0].to_lowercase().as_str() {
            "insert" => {
                if parts.len() < 3 {
                    println!("Usage: insert <key> <value>");
                    continue;
                }
                let key = parts[1].to_string();
                let value = parts[2..].join(" ");
                issue(&addr, Message::Insert { key, value }).await;
            }
            "delete" => {
                if parts.len() != 2 {
                    println!("Usage: delete <key>");
                    continue;
                }
                issue(&addr, Message::Delete { key: parts[1].to_string() }).await;
            }
            "query" => {
                if parts.len() != 2 {
                    println!("Usage: query <key>");
                    continue;
                }
                issue(&addr, Message::Query { key: parts[1].to_string() }).await;
            }
            "overlay" => {
                issue(
                    &addr,
                    Message::Overlay {
                        start_id: None,
                        acc: Vec::new(),
                    },
                )
                .await;
            }
            "depart" => issue(&addr, Message::Depart).await,
            "help" => print_help(),
            "exit" => {
                println!("Bye.");
                break;
            }
            _ => println!("Unknown command. Type 'help'."),
        }
    }

    Ok(())
}

async fn issue(addr: &Address, message: Message) {
    let origin = Origin {
        ip: "client".to_string(),
        port: 0,
    };
    let request = message.to_request(&origin);
    match net::send_request(addr, &request, REQUEST_TIMEOUT_MILLIS).await {
        Ok(response) => match serde_json::to_string_pretty(&response) {
            Ok(text) => println!("{}", text),
            Err(e) => println!("Error: {}", e),
        },
        Err(e) => println!("Error: {}", e),
    }
}

fn print_help() {
    println!("\nAvailable commands:");
    println!("  insert <key> <value>   Insert a key-value pair");
    println!("  delete <key>           Delete a key");
    println!("  query <key>            Query a key (or '*' for all)");
    println!("  overlay                Print ring topology");
    println!("  depart                 Gracefully depart node");
    println!("  help                   Show this message");
    println!("  exit                   Exit client\n");
}
