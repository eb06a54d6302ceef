use log::{debug, warn};
use tokio::net::{TcpListener, TcpStream};

use crate::error::NodeError;
use crate::net;
use crate::proto::Response;
use crate::threads::chord::ChordService;

/// Accept loop of a node. Every connection carries exactly one request and
/// one response; a dedicated task serves each connection.
pub async fn serve(service: ChordService, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                debug!("New connection from {}", addr);
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client_connection(service, socket).await {
                        warn!("Connection handler failed: {}", e);
                    }
                });
            }
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
}

pub async fn handle_client_connection(
    service: ChordService,
    mut socket: TcpStream,
) -> Result<(), NodeError> {
    let response = match net::read_message(&mut socket).await {
        Ok(message) => service.handle_message(message).await,
        Err(e) => Response::error(None, e.to_string()),
    };
    net::write_message(&mut socket, &response).await
}
