use super::*;

/// The registries: pools, clients and which pool each client is on. Pools
/// are fixed at startup; clients come and go with their connections.
#[derive(Clone)]
pub struct ProxyHandle {
    inner: Arc<Inner>,
}

struct Inner {
    pools: Vec<PoolHandle>,
    started: Instant,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    clients: HashMap<WorkerIdentifier, ClientHandle>,
    assignments: HashMap<WorkerIdentifier, usize>,
}

/// An aggregate view over every connected worker, for telemetry.
#[derive(Debug, Clone)]
pub struct ProxySnapshot {
    pub miners: usize,
    pub current_pool: String,
    pub algorithm: Algorithm,
    pub hashrate_short: f64,
    pub hashrate_medium: f64,
    pub hashrate_long: f64,
    pub hashrate_extra_long: f64,
    pub shares_total: u64,
    pub shares_good: u64,
    pub hashes_total: u64,
    pub uptime: Duration,
}

impl ProxyHandle {
    pub fn new(pools: Vec<PoolHandle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pools,
                started: Instant::now(),
                state: Mutex::default(),
            }),
        }
    }

    pub fn pools(&self) -> &[PoolHandle] {
        &self.inner.pools
    }

    pub async fn register_client(&self, client: ClientHandle) {
        self.inner
            .state
            .lock()
            .clients
            .insert(client.id, client.clone());
        self.assign(client).await;
    }

    pub async fn client_disconnected(&self, id: WorkerIdentifier) {
        let assignment = {
            let mut state = self.inner.state.lock();
            state.clients.remove(&id);
            state.assignments.remove(&id)
        };
        if let Some(index) = assignment {
            self.inner.pools[index].remove_worker(id).await;
        }
    }

    /// Attaches a client to the pool that needs a worker the most:
    /// algorithm-compatible pools first, the emptiest by weighted worker
    /// count among those, heaviest weight as the tiebreak. Pools may refuse
    /// (no active template, algorithm mismatch); the next one is tried.
    async fn assign(&self, client: ClientHandle) -> bool {
        let pools = &self.inner.pools;

        let mut order: Vec<usize> = (0..pools.len()).collect();
        order.sort_by(|&a, &b| {
            let pool_a = &pools[a].shared;
            let pool_b = &pools[b].shared;
            let incompatible_a = !client.shared.supports(pool_a.algorithm);
            let incompatible_b = !client.shared.supports(pool_b.algorithm);
            incompatible_a
                .cmp(&incompatible_b)
                .then_with(|| {
                    pool_a
                        .weighted_workers()
                        .partial_cmp(&pool_b.weighted_workers())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    pool_b
                        .weight
                        .partial_cmp(&pool_a.weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        for index in order {
            let pool = &pools[index];
            if !client.shared.supports(pool.shared.algorithm)
                || client.shared.is_banned_from(&pool.shared.descriptor())
            {
                continue;
            }
            if pool.add_worker(client.clone()).await {
                info!(
                    "Worker {} assigned to pool {}",
                    client.id,
                    pool.shared.descriptor()
                );
                client.assign_pool(pool.clone());
                self.inner.state.lock().assignments.insert(client.id, index);
                return true;
            }
        }

        warn!("No pool accepted worker {}", client.id);
        false
    }

    /// One balancing round: sample every worker's rate, plan moves to keep
    /// pool totals proportional to their weights, then execute them.
    pub async fn rebalance(&self) {
        let pools = &self.inner.pools;
        let weights: Vec<f64> = pools.iter().map(|pool| pool.shared.weight).collect();

        let samples: Vec<WorkerSample> = {
            let state = self.inner.state.lock();
            state
                .clients
                .values()
                .map(|client| WorkerSample {
                    worker: client.id,
                    hash_rate: client.shared.average_hash_rate(),
                    pool: state
                        .assignments
                        .get(&client.id)
                        .copied()
                        .unwrap_or(usize::MAX),
                })
                .collect()
        };

        for (index, pool) in pools.iter().enumerate() {
            let rate: f64 = samples
                .iter()
                .filter(|sample| sample.pool == index)
                .map(|sample| sample.hash_rate)
                .sum();
            pool.shared.hash_rate.lock().add_hash_rate(rate);
            debug!(
                "Pool {}: rate {rate:.0} H/s, workers {}, weight {:.2}",
                pool.shared.descriptor(),
                pool.shared.num_workers.load(Ordering::Relaxed),
                pool.shared.weight,
            );
        }

        let plan = plan_rebalance(&weights, &samples);
        if plan.is_empty() {
            return;
        }

        info!("Rebalancing {} workers across pools", plan.len());
        for Assignment { worker, from, to } in plan {
            let client = self.inner.state.lock().clients.get(&worker).cloned();
            let Some(client) = client else {
                continue;
            };

            // Never move a worker onto a pool that banned its address; it
            // keeps its current assignment instead.
            if client.shared.is_banned_from(&pools[to].shared.descriptor()) {
                continue;
            }

            if from < pools.len() {
                pools[from].remove_worker(worker).await;
            }

            if pools[to].add_worker(client.clone()).await {
                client.assign_pool(pools[to].clone());
                self.inner.state.lock().assignments.insert(worker, to);
            } else {
                // The planned target refused; fall back to a full scan.
                self.inner.state.lock().assignments.remove(&worker);
                self.assign(client).await;
            }
        }
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        let state = self.inner.state.lock();

        let mut snapshot = ProxySnapshot {
            miners: state.clients.len(),
            current_pool: String::new(),
            algorithm: Algorithm::default(),
            hashrate_short: 0.0,
            hashrate_medium: 0.0,
            hashrate_long: 0.0,
            hashrate_extra_long: 0.0,
            shares_total: 0,
            shares_good: 0,
            hashes_total: 0,
            uptime: self.inner.started.elapsed(),
        };

        for client in state.clients.values() {
            let hash_rate = client.shared.hash_rate.lock();
            snapshot.hashrate_short += hash_rate.average_short();
            snapshot.hashrate_medium += hash_rate.average_medium();
            snapshot.hashrate_long += hash_rate.average_long();
            snapshot.hashrate_extra_long += hash_rate.average_extra_long();
            snapshot.hashes_total += hash_rate.total_hashes();
            snapshot.shares_total += client.shared.total_submits.load(Ordering::Relaxed);
            snapshot.shares_good += client.shared.good_submits.load(Ordering::Relaxed);
        }

        if let Some(pool) = self
            .inner
            .pools
            .iter()
            .max_by(|a, b| {
                a.shared
                    .weight
                    .partial_cmp(&b.shared.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        {
            snapshot.algorithm = pool.shared.algorithm;
            snapshot.current_pool = format!(
                "{} with {} miners",
                pool.shared.descriptor(),
                pool.shared.num_workers.load(Ordering::Relaxed)
            );
        }

        snapshot
    }
}

pub fn spawn_balancer(
    proxy: ProxyHandle,
    period: Duration,
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
) {
    tasks.spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => proxy.rebalance().await,
            }
        }
    });
}

/// Wires the whole proxy together and runs until ctrl-c.
pub async fn run(config: Config) -> Result {
    ensure!(!config.pools.is_empty(), "no pools configured");
    ensure!(!config.server.is_empty(), "no server endpoints configured");

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let pools = config
        .pools
        .iter()
        .map(|pool_config| pool::spawn(pool_config, &mut tasks, cancel.clone()))
        .collect();

    let proxy = ProxyHandle::new(pools);

    for server_config in config.server.clone() {
        server::spawn(server_config, proxy.clone(), &mut tasks, cancel.clone()).await?;
    }

    spawn_balancer(
        proxy.clone(),
        config.balance_interval(),
        &mut tasks,
        cancel.clone(),
    );

    if let Some(cc_config) = config.cc_client.clone() {
        cc_client::spawn(cc_config, config.threads, proxy.clone(), &mut tasks, cancel.clone());
    }

    tokio::select! {
        _ = ctrl_c() => {
            info!("Received shutdown signal");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    info!("Waiting for {} tasks to stop", tasks.len());
    while tasks.join_next().await.is_some() {}
    info!("Proxy stopped");

    Ok(())
}
