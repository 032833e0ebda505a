use {
    super::*,
    tokio_rustls::{
        TlsAcceptor, TlsConnector,
        rustls::{
            ClientConfig as TlsClientConfig, RootCertStore, ServerConfig as TlsServerConfig,
            pki_types::{CertificateDer, ServerName},
        },
    },
};

/// Plain-TCP and TLS streams behind one object; the protocol above is
/// line-oriented either way.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub connection_type: ConnectionType,
}

impl Endpoint {
    pub fn use_tls(&self) -> bool {
        match self.connection_type {
            ConnectionType::Tls => true,
            ConnectionType::Tcp => false,
            ConnectionType::Auto => self.port == 443,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens an outbound connection, wrapping it in TLS when the endpoint calls
/// for it.
pub async fn connect(endpoint: &Endpoint) -> Result<BoxedStream> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    stream.set_nodelay(true).ok();

    if !endpoint.use_tls() {
        return Ok(Box::new(stream));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = TlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(endpoint.host.clone())
        .with_context(|| format!("invalid TLS server name `{}`", endpoint.host))?;

    let stream = TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .with_context(|| format!("TLS handshake with {endpoint} failed"))?;

    Ok(Box::new(stream))
}

/// Builds the acceptor for a TLS-terminating downstream server from its PEM
/// files. Fails at startup, not at accept time.
pub fn tls_acceptor(certificate_chain: &Path, private_key: &Path) -> Result<TlsAcceptor> {
    let certificates = rustls_pemfile::certs(&mut io::BufReader::new(
        fs::File::open(certificate_chain)
            .with_context(|| format!("failed to open {}", certificate_chain.display()))?,
    ))
    .collect::<Result<Vec<CertificateDer>, _>>()
    .context("failed to parse certificate chain")?;
    ensure!(!certificates.is_empty(), "certificate chain is empty");

    let key = rustls_pemfile::private_key(&mut io::BufReader::new(
        fs::File::open(private_key)
            .with_context(|| format!("failed to open {}", private_key.display()))?,
    ))
    .context("failed to parse private key")?
    .context("no private key found")?;

    let config = TlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certificates, key)
        .context("invalid certificate/key pair")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accepts one inbound stream, TLS-wrapped when an acceptor is configured.
pub async fn accept(stream: TcpStream, acceptor: Option<&TlsAcceptor>) -> Result<BoxedStream> {
    stream.set_nodelay(true).ok();
    match acceptor {
        Some(acceptor) => Ok(Box::new(
            acceptor
                .accept(stream)
                .await
                .context("TLS handshake failed")?,
        )),
        None => Ok(Box::new(stream)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16, connection_type: ConnectionType) -> Endpoint {
        Endpoint {
            host: "pool.example.com".into(),
            port,
            connection_type,
        }
    }

    #[test]
    fn auto_resolves_tls_on_port_443() {
        assert!(endpoint(443, ConnectionType::Auto).use_tls());
        assert!(!endpoint(3333, ConnectionType::Auto).use_tls());
        assert!(endpoint(3333, ConnectionType::Tls).use_tls());
        assert!(!endpoint(443, ConnectionType::Tcp).use_tls());
    }

    #[test]
    fn endpoint_displays_as_host_port() {
        assert_eq!(
            endpoint(4444, ConnectionType::Tcp).to_string(),
            "pool.example.com:4444"
        );
    }
}
