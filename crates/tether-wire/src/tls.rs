//! Mutually authenticated TLS channels.
//!
//! Every endpoint holds a certificate chain and private key signed by a
//! shared root. The relay requires and verifies a client certificate on both
//! of its listeners; producers and consumers verify the relay's certificate
//! against the same root before any application byte is exchanged.
//!
//! Under TLS 1.3 a client finishes its half of the handshake before the
//! server has judged the client certificate, so a dialer only counts a
//! channel as usable once the relay has sent its first frame
//! ([`SecureDialer::attach`]).

use crate::connection::Connection;
use crate::error::WireError;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tether_types::config::{IdentityCheck, IdentityPaths, Role};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

/// Upper bound on TCP connect plus TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side of an established channel.
pub type ClientStream = client::TlsStream<TcpStream>;

/// Server side of an established channel.
pub type ServerStream = server::TlsStream<TcpStream>;

/// An endpoint's certificate chain, private key and trusted root.
pub struct Identity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    roots: Arc<RootCertStore>,
}

impl Identity {
    /// Load PEM identity material from disk.
    pub fn load(paths: &IdentityPaths) -> Result<Self, WireError> {
        let ca = read_pem(&paths.ca_cert)?;
        let cert = read_pem(&paths.cert)?;
        let key = read_pem(&paths.key)?;
        Self::from_pem(&ca, &cert, &key)
    }

    /// Build an identity from in-memory PEM documents.
    pub fn from_pem(ca_pem: &[u8], cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, WireError> {
        let ca_certs = CertificateDer::pem_slice_iter(ca_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WireError::Auth(format!("invalid root certificate: {e}")))?;
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(ca_certs);
        if added == 0 {
            return Err(WireError::Auth(
                "root certificate file contains no usable certificate".into(),
            ));
        }
        if ignored > 0 {
            warn!(ignored, "Skipped unparsable root certificates");
        }

        let certs = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| WireError::Auth(format!("invalid certificate: {e}")))?;
        if certs.is_empty() {
            return Err(WireError::Auth("certificate file is empty".into()));
        }
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| WireError::Auth(format!("invalid private key: {e}")))?;

        Ok(Self {
            certs,
            key,
            roots: Arc::new(roots),
        })
    }

    /// TLS client configuration presenting this identity.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, WireError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(self.certs.clone(), self.key.clone_key())?;
        Ok(Arc::new(config))
    }

    /// TLS server configuration presenting this identity and requiring a
    /// client certificate signed by the shared root.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, WireError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier =
            WebPkiClientVerifier::builder_with_provider(self.roots.clone(), provider.clone())
                .build()
                .map_err(|e| WireError::Auth(format!("client verifier: {e}")))?;
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;
        Ok(Arc::new(config))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("certs", &self.certs.len())
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, WireError> {
    std::fs::read(path).map_err(|e| WireError::Auth(format!("{}: {e}", path.display())))
}

/// Which name the relay certificate must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerVerification {
    /// Match the dialed host.
    Strict,
    /// Match a pre-shared identity regardless of the dialed host.
    Relaxed { expected: String },
}

impl PeerVerification {
    pub fn from_check(check: IdentityCheck, expected: &str) -> Self {
        match check {
            IdentityCheck::Strict => PeerVerification::Strict,
            IdentityCheck::Relaxed => PeerVerification::Relaxed {
                expected: expected.to_string(),
            },
        }
    }

    /// The server name to verify for a connection to `host`.
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>, WireError> {
        let name = match self {
            PeerVerification::Strict => host,
            PeerVerification::Relaxed { expected } => expected.as_str(),
        };
        ServerName::try_from(name.to_string())
            .map_err(|e| WireError::Auth(format!("invalid server name {name:?}: {e}")))
    }
}

/// Opens authenticated channels to the relay.
pub struct SecureDialer {
    role: Role,
    connector: TlsConnector,
    verification: PeerVerification,
}

impl std::fmt::Debug for SecureDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureDialer")
            .field("role", &self.role)
            .field("verification", &self.verification)
            .finish_non_exhaustive()
    }
}

impl SecureDialer {
    pub fn new(
        role: Role,
        identity: &Identity,
        verification: PeerVerification,
    ) -> Result<Self, WireError> {
        if let PeerVerification::Relaxed { expected } = &verification {
            warn!(
                role = %role,
                expected = %expected,
                "Relay certificate checked against a fixed identity, not the dialed host"
            );
        }
        Ok(Self {
            role,
            connector: TlsConnector::from(identity.client_config()?),
            verification,
        })
    }

    /// Connect to `host:port` and complete the handshake.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ClientStream, WireError> {
        let addr = format!("{host}:{port}");
        let server_name = self.verification.server_name(host)?;

        let tcp = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| WireError::Connect {
                addr: addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| WireError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        let handshake = self.connector.connect(server_name, tcp);
        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| WireError::Handshake {
                peer: addr.clone(),
                reason: "handshake timed out".into(),
            })?
            .map_err(|e| WireError::Handshake {
                peer: addr.clone(),
                reason: e.to_string(),
            })?;
        debug!(role = %self.role, addr = %addr, "Secure channel established");
        Ok(stream)
    }

    /// Connect to the relay and wait until it accepts us.
    ///
    /// The relay starts heartbeating as soon as a connection is attached, so
    /// its first frame is the acknowledgement. A relay that rejects our
    /// certificate closes the channel instead; that, or silence for
    /// [`HANDSHAKE_TIMEOUT`], is reported as [`WireError::Handshake`].
    pub async fn attach(&self, host: &str, port: u16) -> Result<RelayLink, WireError> {
        let stream = self.connect(host, port).await?;
        let conn = Connection::new(stream, format!("{host}:{port}"));
        match conn.read_frame(HANDSHAKE_TIMEOUT).await {
            Ok(first_frame) => Ok(RelayLink { conn, first_frame }),
            Err(e) => {
                conn.close("relay did not accept the connection").await;
                Err(WireError::Handshake {
                    peer: conn.peer().to_string(),
                    reason: format!("relay rejected the connection: {e}"),
                })
            }
        }
    }
}

/// A channel the relay has accepted, with the frame that confirmed it.
///
/// `first_frame` is usually the liveness sentinel. On the consumer port it
/// may already be a forwarded event, so consumers must dispatch it.
pub struct RelayLink {
    pub conn: Connection<ClientStream>,
    pub first_frame: Vec<u8>,
}

/// A listening socket whose accepted connections must present a client
/// certificate signed by the shared root.
pub struct SecureListener {
    role: Role,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    required_identity: Option<Arc<RequiredIdentity>>,
}

/// A name every client certificate on a listener must be valid for.
#[derive(Debug)]
struct RequiredIdentity {
    label: String,
    name: ServerName<'static>,
}

impl SecureListener {
    /// Bind a listener for connections from `role` endpoints.
    pub async fn bind(
        addr: SocketAddr,
        role: Role,
        identity: &Identity,
    ) -> Result<Self, WireError> {
        let acceptor = TlsAcceptor::from(identity.server_config()?);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            role,
            listener,
            acceptor,
            required_identity: None,
        })
    }

    /// Additionally require client certificates to be valid for `name`
    /// (a DNS name or IP address in the subject alternative names).
    pub fn require_identity(mut self, name: &str) -> Result<Self, WireError> {
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| WireError::Auth(format!("invalid client identity {name:?}: {e}")))?;
        self.required_identity = Some(Arc::new(RequiredIdentity {
            label: name.to_string(),
            name: server_name,
        }));
        Ok(self)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WireError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one TCP connection. The handshake runs separately so a slow
    /// client never blocks the accept loop.
    pub async fn accept(&self) -> Result<PendingHandshake, WireError> {
        let (tcp, peer) = self.listener.accept().await?;
        let _ = tcp.set_nodelay(true);
        Ok(PendingHandshake {
            tcp,
            peer,
            acceptor: self.acceptor.clone(),
            required_identity: self.required_identity.clone(),
        })
    }
}

/// An accepted connection that has not yet authenticated.
pub struct PendingHandshake {
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    required_identity: Option<Arc<RequiredIdentity>>,
}

impl PendingHandshake {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run the server handshake, failing if the client presents no valid
    /// certificate or one not valid for the listener's required identity.
    pub async fn complete(self) -> Result<ServerStream, WireError> {
        let peer = self.peer.to_string();
        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.acceptor.accept(self.tcp))
            .await
            .map_err(|_| WireError::Handshake {
                peer: peer.clone(),
                reason: "handshake timed out".into(),
            })?
            .map_err(|e| WireError::Handshake {
                peer: peer.clone(),
                reason: e.to_string(),
            })?;

        if let Some(required) = &self.required_identity {
            let (_, session) = stream.get_ref();
            let leaf = session.peer_certificates().and_then(|certs| certs.first());
            check_client_identity(leaf, required)
                .map_err(|reason| WireError::Handshake { peer, reason })?;
        }
        Ok(stream)
    }
}

fn check_client_identity(
    leaf: Option<&CertificateDer<'_>>,
    required: &RequiredIdentity,
) -> Result<(), String> {
    let leaf = leaf.ok_or_else(|| "no client certificate".to_string())?;
    let cert = webpki::EndEntityCert::try_from(leaf)
        .map_err(|e| format!("unparsable client certificate: {e}"))?;
    cert.verify_is_valid_for_subject_name(&required.name)
        .map_err(|e| format!("client certificate is not valid for {}: {e}", required.label))
}
