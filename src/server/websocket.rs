use crate::cli::Args;
use crate::server::auth::SessionSigner;
use crate::server::registry::ConnectionRegistry;

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response, ErrorResponse };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };

use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };
use url::form_urlencoded;

use log::{ debug, info, warn, error };
use futures::{ SinkExt, StreamExt };

/// Clients never need to send more than a close or ping on the push channel.
const MAX_INBOUND_FRAME_SIZE: usize = 64 * 1024;

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;
    let key = match pkcs8_private_keys(&mut BufReader::new(key_file)).next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

/// Everything a connection task needs, cloned per accepted socket.
#[derive(Clone)]
pub struct PushContext {
    pub registry: Arc<ConnectionRegistry>,
    pub signer: SessionSigner,
}

pub async fn start_ws_server(
    addr: &str,
    context: PushContext,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    let tls_acceptor = if args.enable_tls {
        match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                Some(TlsAcceptor::from(load_tls_config(cert_path, key_path)?))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("Missing TLS certificate or key path".into());
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                return Err("TLS enabled without cert/key".into());
            }
        }
    } else {
        info!("TLS not enabled. Running plain WebSocket (WS) push channel.");
        None
    };
    let protocol = if tls_acceptor.is_some() { "wss" } else { "ws" };
    info!("{} push channel listening on: {}", protocol.to_uppercase(), addr);

    let per_second = NonZeroU32::new(args.connection_rate_limit).unwrap_or(NonZeroU32::MIN);
    let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

    serve_push_channel(listener, context, tls_acceptor, limiter).await
}

/// Accept loop over an already bound listener.
pub async fn serve_push_channel(
    listener: TcpListener,
    context: PushContext,
    tls_acceptor: Option<TlsAcceptor>,
    limiter: Arc<DefaultDirectRateLimiter>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        debug!("Incoming connection from: {}", peer);
        let context = context.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = match tls_acceptor {
                Some(acceptor) =>
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => process_connection(peer, tls_stream, context).await,
                        Err(e) => {
                            error!("TLS handshake error for {}: {}", peer, e);
                            Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                        }
                    }
                None => process_connection(peer, stream, context).await,
            };

            if let Err(e) = process_result {
                warn!("Push channel for {} ended with error: {}", peer, e);
            }
        });
    }
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::UNAUTHORIZED;
    response
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    context: PushContext
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let mut session_user: Option<String> = None;
    let signer = context.signer.clone();

    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let qs = req.uri().query().unwrap_or("");
        let token = form_urlencoded
            ::parse(qs.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned());

        let Some(token) = token else {
            warn!("{}: push channel handshake without token", peer);
            return Err(unauthorized("missing token"));
        };
        match signer.verify(&token) {
            Ok(user_id) => {
                session_user = Some(user_id);
                Ok(response)
            }
            Err(e) => {
                warn!("{}: {}", peer, e);
                Err(unauthorized("invalid session"))
            }
        }
    };

    let websocket = accept_hdr_async(stream, auth_callback).await?;
    match session_user {
        Some(user_id) => {
            handle_connection(peer, user_id, websocket, context.registry).await;
            Ok(())
        }
        None => Err("handshake completed without a session".into()),
    }
}

/// Relays registry frames to the socket until either side goes away. Inbound frames carry
/// no commands; only close and ping are meaningful.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    user_id: String,
    websocket: WebSocketStream<S>,
    registry: Arc<ConnectionRegistry>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let (connection_id, mut outbound) = registry.connect(&user_id);
    let (mut tx, mut rx) = websocket.split();
    info!("Push channel open for {} from {}", user_id, peer);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = tx.send(Message::Text(frame)).await {
                    warn!("Error pushing to {} ({}): {}", user_id, peer, e);
                    break;
                }
            }
            incoming = rx.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        if message.len() > MAX_INBOUND_FRAME_SIZE {
                            warn!("Frame from {} exceeds size limit ({} > {})", peer, message.len(), MAX_INBOUND_FRAME_SIZE);
                            break;
                        }
                        match message {
                            Message::Close(_) => {
                                info!("Received close frame from {}", peer);
                                break;
                            }
                            Message::Ping(data) => {
                                if tx.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Message::Text(_) | Message::Binary(_) => {
                                debug!("Ignoring client frame on push channel from {}", peer);
                            }
                            Message::Pong(_) | Message::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        info!("Push channel error for {}: {}", peer, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    registry.disconnect(&user_id, connection_id);
    info!("Push channel closed for {} ({})", user_id, peer);
}
