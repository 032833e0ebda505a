use {super::*, tokio_rustls::TlsAcceptor};

/// Binds one downstream listener and spawns a session per inbound worker.
/// Bind and certificate failures abort startup.
pub async fn spawn(
    config: ServerConfig,
    proxy: ProxyHandle,
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
) -> Result {
    let endpoint = config.endpoint();

    let acceptor = if endpoint.use_tls() {
        match (&config.certificate_chain_file, &config.private_key_file) {
            (Some(certificate_chain), Some(private_key)) => {
                Some(connection::tls_acceptor(certificate_chain, private_key)?)
            }
            _ => bail!(
                "TLS server {endpoint} needs certificateChainFile and privateKeyFile"
            ),
        }
    } else {
        None
    };

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind to {endpoint}"))?;

    info!("Listening for workers on {endpoint}");

    let config = Arc::new(config);
    tasks.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let config = config.clone();
                            let acceptor = acceptor.clone();
                            let proxy = proxy.clone();
                            let cancel = cancel.child_token();

                            tokio::spawn(async move {
                                if let Err(err) =
                                    serve_connection(stream, peer, config, acceptor, proxy, cancel)
                                        .await
                                {
                                    debug!("Worker session {peer} ended with error: {err}");
                                }
                            });
                        }
                        Err(err) => warn!("Accept failed on {}: {err}", config.port),
                    }
                }
            }
        }
        debug!("Listener task stopped");
    });

    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    acceptor: Option<TlsAcceptor>,
    proxy: ProxyHandle,
    cancel: CancellationToken,
) -> Result {
    let stream = connection::accept(stream, acceptor.as_ref()).await?;

    let id = Uuid::new_v4();
    info!("New worker connection <{id}@{peer}>");

    let shared = Arc::new(ClientShared::new(id, config.default_algorithm()));
    let (handle, rx) = ClientHandle::new(shared.clone());

    proxy.register_client(handle).await;

    let client = Client::new(shared, rx, peer, &config);
    let served = client.serve(stream, cancel).await;

    proxy.client_disconnected(id).await;
    info!("Worker <{id}@{peer}> disconnected");

    served
}
