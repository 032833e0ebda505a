use super::*;

/// Periodic status publisher for a command-and-control dashboard. Failures
/// are logged and retried on the next tick; the proxy never depends on it.
pub fn spawn(
    config: CcClientConfig,
    threads: usize,
    proxy: ProxyHandle,
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
) {
    tasks.spawn(run(config, threads, proxy, cancel));
}

#[derive(Serialize)]
struct StatusEnvelope {
    client_status: ClientStatus,
}

#[derive(Serialize)]
struct ClientStatus {
    client_id: String,
    current_status: String,
    current_pool: String,
    current_algo_name: String,
    cpu_brand: String,
    external_ip: String,
    version: String,
    hashrate_short: f64,
    hashrate_medium: f64,
    hashrate_long: f64,
    hashrate_highest: f64,
    current_threads: usize,
    shares_good: u64,
    shares_total: u64,
    hashes_total: u64,
    uptime: u64,
}

async fn run(config: CcClientConfig, threads: usize, proxy: ProxyHandle, cancel: CancellationToken) {
    let endpoint = config.endpoint();
    let scheme = if endpoint.use_tls() { "https" } else { "http" };
    let base = format!("{scheme}://{endpoint}");

    let http = reqwest::Client::new();
    let session = Uuid::new_v4();
    let cpu_brand = cpu_brand();
    let threads = if threads > 0 {
        threads
    } else {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
    };

    publish_config(&http, &base, &config).await;

    let mut timer = tokio::time::interval(Duration::from_secs(config.update_interval_seconds));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                let snapshot = proxy.snapshot();
                let status = ClientStatus {
                    client_id: session.to_string(),
                    current_status: "RUNNING".into(),
                    current_pool: snapshot.current_pool,
                    current_algo_name: snapshot.algorithm.to_string(),
                    cpu_brand: cpu_brand.clone(),
                    external_ip: String::new(),
                    version: env!("CARGO_PKG_VERSION").into(),
                    hashrate_short: snapshot.hashrate_short,
                    hashrate_medium: snapshot.hashrate_medium,
                    hashrate_long: snapshot.hashrate_long,
                    hashrate_highest: snapshot.hashrate_extra_long,
                    current_threads: threads,
                    shares_good: snapshot.shares_good,
                    shares_total: snapshot.shares_total,
                    hashes_total: snapshot.hashes_total,
                    uptime: snapshot.uptime.as_secs(),
                };

                let url = format!(
                    "{base}/client/setClientStatus?clientId={}-{session}",
                    config.worker_id,
                );
                let request = http
                    .post(&url)
                    .bearer_auth(&config.access_token)
                    .json(&StatusEnvelope { client_status: status });

                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Published status to {url}");
                    }
                    Ok(response) => {
                        warn!("Status publish to {url} returned {}", response.status());
                    }
                    Err(err) => warn!("Status publish to {url} failed: {err}"),
                }
            }
        }
    }
}

/// One-shot configuration announcement at startup.
async fn publish_config(http: &reqwest::Client, base: &str, config: &CcClientConfig) {
    let url = format!("{base}/client/setClientConfig?clientId={}", config.worker_id);
    match http
        .post(&url)
        .bearer_auth(&config.access_token)
        .json(&json!({}))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            info!("Published configuration to {url}");
        }
        Ok(response) => warn!("Config publish returned {}", response.status()),
        Err(err) => warn!("Config publish failed: {err}"),
    }
}

fn cpu_brand() -> String {
    let system = sysinfo::System::new_all();
    system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .unwrap_or_default()
}
