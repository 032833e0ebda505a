use super::*;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);
const COMMAND_BUFFER: usize = 64;

/// Pool state shared with the proxy, the balancer and telemetry. Only the
/// pool task mutates it.
pub struct PoolShared {
    pub endpoint: Endpoint,
    pub username: String,
    pub algorithm: Algorithm,
    pub weight: f64,
    pub num_workers: AtomicUsize,
    pub connected: AtomicBool,
    pub hash_rate: Mutex<HashRateCalculator>,
    pub accepted_shares: AtomicU64,
    pub rejected_shares: AtomicU64,
}

impl PoolShared {
    pub fn descriptor(&self) -> String {
        self.endpoint.to_string()
    }

    /// The balancer's load metric: worker count scaled by configured weight.
    pub fn weighted_workers(&self) -> f64 {
        let workers = self.num_workers.load(Ordering::Relaxed) as f64;
        if self.weight > 0.0 {
            workers / self.weight
        } else {
            f64::INFINITY
        }
    }
}

#[derive(Clone)]
pub struct PoolHandle {
    pub shared: Arc<PoolShared>,
    tx: mpsc::Sender<PoolCommand>,
}

impl PoolHandle {
    /// Attaches a worker; true iff the pool can serve it a job right now.
    pub async fn add_worker(&self, client: ClientHandle) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(PoolCommand::AddWorker { client, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn remove_worker(&self, worker: WorkerIdentifier) {
        let _ = self.tx.send(PoolCommand::RemoveWorker { worker }).await;
    }

    pub async fn get_job(
        &self,
        worker: WorkerIdentifier,
        worker_type: WorkerType,
    ) -> Option<MintedJob> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolCommand::GetJob {
                worker,
                worker_type,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Queues a share for upstream submission. The returned receiver yields
    /// the pool's verdict; a dropped sender means the connection died first.
    pub async fn submit(&self, result: JobResult) -> oneshot::Receiver<SubmitStatus> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(PoolCommand::Submit { result, reply }).await;
        rx
    }
}

enum PoolCommand {
    AddWorker {
        client: ClientHandle,
        reply: oneshot::Sender<bool>,
    },
    RemoveWorker {
        worker: WorkerIdentifier,
    },
    GetJob {
        worker: WorkerIdentifier,
        worker_type: WorkerType,
        reply: oneshot::Sender<Option<MintedJob>>,
    },
    Submit {
        result: JobResult,
        reply: oneshot::Sender<SubmitStatus>,
    },
}

enum Exit {
    Shutdown,
    Disconnected,
}

enum PendingRequest {
    Login,
    GetJob,
    Keepalive,
    Submit {
        template_job_id: String,
        reply: oneshot::Sender<SubmitStatus>,
    },
}

pub fn spawn(
    config: &PoolConfig,
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
) -> PoolHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    let shared = Arc::new(PoolShared {
        endpoint: config.endpoint(),
        username: config.username.clone(),
        algorithm: config.algorithm(),
        weight: config.weight,
        num_workers: AtomicUsize::new(0),
        connected: AtomicBool::new(false),
        hash_rate: Mutex::new(HashRateCalculator::new()),
        accepted_shares: AtomicU64::new(0),
        rejected_shares: AtomicU64::new(0),
    });

    let pool = Pool {
        shared: shared.clone(),
        password: config.password.clone(),
        rx,
        cancel,
        workers: HashMap::new(),
        templates: HashMap::new(),
        active_template: None,
        login_id: None,
        next_request_id: 1,
        pending: HashMap::new(),
    };

    tasks.spawn(pool.run());

    PoolHandle { shared, tx }
}

struct Pool {
    shared: Arc<PoolShared>,
    password: String,
    rx: mpsc::Receiver<PoolCommand>,
    cancel: CancellationToken,
    workers: HashMap<WorkerIdentifier, ClientHandle>,
    templates: HashMap<String, JobTemplate>,
    active_template: Option<String>,
    login_id: Option<String>,
    next_request_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl Pool {
    async fn run(mut self) {
        let descriptor = self.shared.descriptor();
        let mut backoff = RECONNECT_MIN;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match connection::connect(&self.shared.endpoint).await {
                Ok(stream) => {
                    info!("Connected to pool {descriptor}");
                    self.shared.connected.store(true, Ordering::Relaxed);

                    let exit = self.serve(stream, &mut backoff).await;

                    self.shared.connected.store(false, Ordering::Relaxed);
                    self.handle_disconnect();

                    match exit {
                        Ok(Exit::Shutdown) => break,
                        Ok(Exit::Disconnected) => warn!("Lost connection to pool {descriptor}"),
                        Err(err) => warn!("Pool {descriptor} connection error: {err}"),
                    }
                }
                Err(err) => warn!("{err}"),
            }

            if self.back_off(backoff).await.is_none() {
                break;
            }
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }

        debug!("Pool {descriptor} task stopped");
    }

    /// Sleeps out the reconnect delay while still answering commands, all of
    /// which fail while there is no connection.
    async fn back_off(&mut self, delay: Duration) -> Option<()> {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = &mut deadline => return Some(()),
                Some(command) = self.rx.recv() => self.refuse(command),
            }
        }
    }

    fn refuse(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::AddWorker { reply, .. } => {
                let _ = reply.send(false);
            }
            PoolCommand::RemoveWorker { worker } => {
                self.remove_worker(worker);
            }
            PoolCommand::GetJob { reply, .. } => {
                let _ = reply.send(None);
            }
            PoolCommand::Submit { reply, .. } => {
                let _ = reply.send(SubmitStatus::RejectedInvalidJobId);
            }
        }
    }

    async fn serve(&mut self, stream: BoxedStream, backoff: &mut Duration) -> Result<Exit> {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        self.pending.clear();
        self.login_id = None;

        let login = LoginParams {
            login: self.shared.username.clone(),
            pass: self.password.clone(),
            agent: USER_AGENT.into(),
            algo: Some(self.shared.algorithm.kind.as_str().into()),
            algo_perf: None,
        };
        self.send_request(
            &mut writer,
            "login",
            serde_json::to_value(login)?,
            PendingRequest::Login,
        )
        .await?;

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Exit::Shutdown),

                _ = keepalive.tick() => {
                    if let Some(id) = self.login_id.clone() {
                        let params = serde_json::to_value(KeepalivedParams { id })?;
                        self.send_request(&mut writer, "keepalived", params, PendingRequest::Keepalive).await?;
                    }
                }

                Some(command) = self.rx.recv() => {
                    self.handle_command(command, &mut writer).await?;
                }

                // A cancelled read leaves its partial line in the buffer, so
                // it is only cleared after a whole line was handled.
                read = reader.read_line(&mut line) => {
                    match read {
                        Ok(0) => return Ok(Exit::Disconnected),
                        Ok(_) => {
                            self.handle_line(line.trim(), &mut writer, backoff).await?;
                            line.clear();
                        }
                        Err(err) => return Err(err).context("pool socket read"),
                    }
                }
            }
        }
    }

    async fn handle_command<W: AsyncWrite + Unpin>(
        &mut self,
        command: PoolCommand,
        writer: &mut W,
    ) -> Result {
        match command {
            PoolCommand::AddWorker { client, reply } => {
                let _ = reply.send(self.add_worker(client));
            }
            PoolCommand::RemoveWorker { worker } => {
                self.remove_worker(worker);
            }
            PoolCommand::GetJob {
                worker,
                worker_type,
                reply,
            } => {
                let _ = reply.send(self.mint_job(worker, worker_type));
            }
            PoolCommand::Submit { result, reply } => {
                self.submit(result, reply, writer).await?;
            }
        }
        Ok(())
    }

    fn add_worker(&mut self, client: ClientHandle) -> bool {
        if !client.shared.supports(self.shared.algorithm)
            || client.shared.is_banned_from(&self.shared.descriptor())
        {
            return false;
        }

        let Some(minted) = self.mint_job(client.id, client.shared.worker_type()) else {
            return false;
        };

        client.send_job(minted);
        self.workers.insert(client.id, client);
        self.shared
            .num_workers
            .store(self.workers.len(), Ordering::Relaxed);
        true
    }

    fn remove_worker(&mut self, worker: WorkerIdentifier) {
        self.workers.remove(&worker);
        self.shared
            .num_workers
            .store(self.workers.len(), Ordering::Relaxed);
    }

    fn mint_job(&mut self, worker: WorkerIdentifier, worker_type: WorkerType) -> Option<MintedJob> {
        let active = self.active_template.clone()?;
        let template = self.templates.get_mut(&active)?;
        if !template.supports(worker_type) {
            return None;
        }
        match template.get_job_for(worker, worker_type) {
            Ok(minted) => minted,
            Err(err) => {
                warn!("Failed to mint job from template {active}: {err}");
                None
            }
        }
    }

    async fn submit<W: AsyncWrite + Unpin>(
        &mut self,
        result: JobResult,
        reply: oneshot::Sender<SubmitStatus>,
        writer: &mut W,
    ) -> Result {
        let Some(login_id) = self.login_id.clone() else {
            let _ = reply.send(SubmitStatus::RejectedInvalidJobId);
            return Ok(());
        };

        let (template_job_id, verdict) = self.route_share(&result);
        match verdict {
            TemplateVerdict::Reject(error) => {
                let _ = reply.send(SubmitStatus::from_stratum_error(error));
            }
            TemplateVerdict::Forward(forwarded) => {
                debug!(
                    "Submitting share to pool {}: job {}, difficulty {}",
                    self.shared.descriptor(),
                    forwarded.job_id,
                    forwarded.difficulty(),
                );
                let params = serde_json::to_value(forwarded.to_submit(&login_id))?;
                self.send_request(
                    writer,
                    "submit",
                    params,
                    PendingRequest::Submit {
                        template_job_id: template_job_id.unwrap_or_default(),
                        reply,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Finds the template that minted the share's subjob and lets it rewrite
    /// the share. The active template is the overwhelmingly common case.
    fn route_share(&mut self, result: &JobResult) -> (Option<String>, TemplateVerdict) {
        let mut order: Vec<String> = Vec::with_capacity(self.templates.len());
        if let Some(active) = &self.active_template {
            order.push(active.clone());
        }
        order.extend(
            self.templates
                .keys()
                .filter(|id| self.active_template.as_deref() != Some(id.as_str()))
                .cloned(),
        );

        for id in order {
            if let Some(template) = self.templates.get_mut(&id) {
                let verdict = template.submit(result);
                if verdict != TemplateVerdict::Reject(StratumError::InvalidJobId) {
                    return (Some(id), verdict);
                }
            }
        }

        (None, TemplateVerdict::Reject(StratumError::InvalidJobId))
    }

    async fn handle_line<W: AsyncWrite + Unpin>(
        &mut self,
        line: &str,
        writer: &mut W,
        backoff: &mut Duration,
    ) -> Result {
        if line.is_empty() {
            return Ok(());
        }

        let message: Message = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                warn!("Invalid message from pool {}: {err}", self.shared.descriptor());
                return Ok(());
            }
        };

        match message {
            Message::Notification { method, params } => {
                if method == "job" {
                    match serde_json::from_value::<JobParams>(params) {
                        Ok(job) => self.apply_job(job),
                        Err(err) => warn!("Failed to parse job notification: {err}"),
                    }
                } else {
                    debug!("Ignoring pool notification `{method}`");
                }
            }
            Message::Response { id, result, error } => {
                self.handle_response(id, result, error, writer, backoff)
                    .await?;
            }
            Message::Request { method, .. } => {
                debug!("Ignoring request `{method}` from pool");
            }
        }
        Ok(())
    }

    async fn handle_response<W: AsyncWrite + Unpin>(
        &mut self,
        id: Id,
        result: Option<Value>,
        error: Option<RpcError>,
        writer: &mut W,
        backoff: &mut Duration,
    ) -> Result {
        let Id::Number(id) = id else {
            warn!("Pool response with non-numeric id {id}");
            return Ok(());
        };
        let Some(pending) = self.pending.remove(&id) else {
            warn!("Unmatched pool response id {id}");
            return Ok(());
        };

        match pending {
            PendingRequest::Login => match (result, error) {
                (Some(result), None) => {
                    let login: LoginResult =
                        serde_json::from_value(result).context("malformed login result")?;
                    info!(
                        "Logged in to pool {} as {}",
                        self.shared.descriptor(),
                        login.id
                    );
                    self.login_id = Some(login.id);
                    *backoff = RECONNECT_MIN;
                    if let Some(job) = login.job {
                        self.apply_job(job);
                    }
                }
                (_, error) => {
                    let message = error.map(|e| e.message).unwrap_or_default();
                    error!(
                        "Login to pool {} failed: {message}",
                        self.shared.descriptor()
                    );
                }
            },
            PendingRequest::GetJob => match (result, error) {
                (Some(result), None) => {
                    let job: JobParams =
                        serde_json::from_value(result).context("malformed getjob result")?;
                    self.apply_job(job);
                }
                (_, error) => {
                    let message = error.map(|e| e.message).unwrap_or_default();
                    warn!("getjob from pool {} failed: {message}", self.shared.descriptor());
                }
            },
            PendingRequest::Keepalive => {
                if let Some(error) = error {
                    debug!("Keepalive rejected by pool: {error}");
                }
            }
            PendingRequest::Submit {
                template_job_id,
                reply,
            } => {
                self.finish_submit(template_job_id, reply, result, error, writer)
                    .await?;
            }
        }
        Ok(())
    }

    async fn finish_submit<W: AsyncWrite + Unpin>(
        &mut self,
        template_job_id: String,
        reply: oneshot::Sender<SubmitStatus>,
        result: Option<Value>,
        error: Option<RpcError>,
        writer: &mut W,
    ) -> Result {
        let Some(error) = error else {
            let accepted = result
                .and_then(|r| serde_json::from_value::<StatusResult>(r).ok())
                .is_some_and(|status| status.is_ok());
            if accepted {
                self.shared.accepted_shares.fetch_add(1, Ordering::Relaxed);
                let _ = reply.send(SubmitStatus::Accepted);
            } else {
                self.shared.rejected_shares.fetch_add(1, Ordering::Relaxed);
                let _ = reply.send(SubmitStatus::RejectedInvalidJobId);
            }
            return Ok(());
        };

        self.shared.rejected_shares.fetch_add(1, Ordering::Relaxed);
        let status = SubmitStatus::from_error_message(&error.message);
        warn!(
            "Pool {} rejected share: {}",
            self.shared.descriptor(),
            error.message
        );

        match status {
            SubmitStatus::RejectedUnauthenticated => {
                // Session lost upstream: log in again.
                let login = LoginParams {
                    login: self.shared.username.clone(),
                    pass: self.password.clone(),
                    agent: USER_AGENT.into(),
                    algo: Some(self.shared.algorithm.kind.as_str().into()),
                    algo_perf: None,
                };
                self.send_request(
                    writer,
                    "login",
                    serde_json::to_value(login)?,
                    PendingRequest::Login,
                )
                .await?;
            }
            SubmitStatus::RejectedExpired | SubmitStatus::RejectedInvalidJobId => {
                self.retire_template(&template_job_id);
                let params = match &self.login_id {
                    Some(id) => json!({"id": id}),
                    None => Value::Null,
                };
                self.send_request(writer, "getjob", params, PendingRequest::GetJob)
                    .await?;
            }
            _ => {}
        }

        let _ = reply.send(status);
        Ok(())
    }

    fn retire_template(&mut self, job_id: &str) {
        self.templates.remove(job_id);
        if self.active_template.as_deref() == Some(job_id) {
            self.active_template = None;
        }
    }

    /// A job from the pool, whichever way it arrived. New job ids become the
    /// active template; known inactive ones are re-activated.
    fn apply_job(&mut self, params: JobParams) {
        let job_id = params.job_id.clone();
        if job_id.is_empty() {
            warn!("Pool {} sent a job without an id", self.shared.descriptor());
            return;
        }

        if !self.templates.contains_key(&job_id) {
            match JobTemplate::from_job_params(&params, self.shared.algorithm) {
                Ok(template) => {
                    info!(
                        "New job from pool {}: {job_id}, difficulty {}",
                        self.shared.descriptor(),
                        template.difficulty(),
                    );
                    self.templates.insert(job_id.clone(), template);
                    self.activate(job_id);
                }
                Err(err) => warn!(
                    "Unusable job {job_id} from pool {}: {err}",
                    self.shared.descriptor()
                ),
            }
        } else if self.active_template.as_deref() != Some(&job_id) {
            debug!("Re-activating known job {job_id}");
            self.activate(job_id);
        }
    }

    /// Replaces the active template and re-serves every attached worker.
    fn activate(&mut self, job_id: String) {
        self.active_template = Some(job_id);

        let workers: Vec<ClientHandle> = self.workers.values().cloned().collect();
        for client in workers {
            match self.mint_job(client.id, client.shared.worker_type()) {
                Some(minted) => client.send_job(minted),
                None => client.revoke_job(),
            }
        }
    }

    async fn send_request<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        method: &str,
        params: Value,
        pending: PendingRequest,
    ) -> Result {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.insert(id, pending);

        let line = Message::request(Id::Number(id), method, params).to_line();
        writer
            .write_all(line.as_bytes())
            .await
            .context("pool socket write")?;
        writer.flush().await.context("pool socket flush")?;
        Ok(())
    }

    /// Connection loss: pending submits fail, templates die, workers get
    /// asked to revoke their jobs.
    fn handle_disconnect(&mut self) {
        for (_, pending) in std::mem::take(&mut self.pending) {
            if let PendingRequest::Submit { reply, .. } = pending {
                let _ = reply.send(SubmitStatus::RejectedInvalidJobId);
            }
        }

        self.templates.clear();
        self.active_template = None;
        self.login_id = None;

        for client in self.workers.values() {
            client.revoke_job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> (Pool, mpsc::Sender<PoolCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let shared = Arc::new(PoolShared {
            endpoint: Endpoint {
                host: "pool.example.com".into(),
                port: 3333,
                connection_type: ConnectionType::Tcp,
            },
            username: "wallet".into(),
            algorithm: Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V1),
            weight: 1.0,
            num_workers: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            hash_rate: Mutex::new(HashRateCalculator::new()),
            accepted_shares: AtomicU64::new(0),
            rejected_shares: AtomicU64::new(0),
        });
        let pool = Pool {
            shared,
            password: "x".into(),
            rx,
            cancel: CancellationToken::new(),
            workers: HashMap::new(),
            templates: HashMap::new(),
            active_template: None,
            login_id: None,
            next_request_id: 1,
            pending: HashMap::new(),
        };
        (pool, tx)
    }

    fn nicehash_job(job_id: &str) -> JobParams {
        let blob = vec![0u8; 76];
        JobParams {
            blob: hex::encode(blob),
            job_id: job_id.into(),
            target: "ffffffff".into(),
            ..Default::default()
        }
    }

    #[test]
    fn new_jobs_become_active_and_known_jobs_reactivate() {
        let (mut pool, _tx) = test_pool();

        pool.apply_job(nicehash_job("a"));
        assert_eq!(pool.active_template.as_deref(), Some("a"));

        pool.apply_job(nicehash_job("b"));
        assert_eq!(pool.active_template.as_deref(), Some("b"));
        assert_eq!(pool.templates.len(), 2);

        // A re-announcement of a known job re-activates it without a rebuild.
        pool.apply_job(nicehash_job("a"));
        assert_eq!(pool.active_template.as_deref(), Some("a"));
        assert_eq!(pool.templates.len(), 2);
    }

    #[test]
    fn minting_respects_worker_types() {
        let (mut pool, _tx) = test_pool();
        pool.apply_job(nicehash_job("a"));

        let worker = Uuid::new_v4();
        assert!(pool.mint_job(worker, WorkerType::Miner).is_some());
        // A nice-hash template cannot serve a downstream proxy.
        assert!(pool.mint_job(worker, WorkerType::Proxy).is_none());
    }

    #[test]
    fn share_routing_tries_the_active_template_first() {
        let (mut pool, _tx) = test_pool();
        pool.apply_job(nicehash_job("a"));

        let worker = Uuid::new_v4();
        let Some(MintedJob::Miner(job)) = pool.mint_job(worker, WorkerType::Miner) else {
            panic!("expected a miner job");
        };

        let result = JobResult::new(job.job_id.clone(), 1, [0u8; 32]);
        let (owner, verdict) = pool.route_share(&result);
        assert_eq!(owner.as_deref(), Some("a"));
        match verdict {
            TemplateVerdict::Forward(forwarded) => assert_eq!(forwarded.job_id, "a"),
            verdict => panic!("expected forward, got {verdict:?}"),
        }

        let unknown = JobResult::new("missing".into(), 1, [0u8; 32]);
        let (owner, verdict) = pool.route_share(&unknown);
        assert!(owner.is_none());
        assert_eq!(
            verdict,
            TemplateVerdict::Reject(StratumError::InvalidJobId)
        );
    }

    #[test]
    fn banned_workers_are_refused() {
        let (mut pool, _tx) = test_pool();
        pool.apply_job(nicehash_job("a"));

        let shared = Arc::new(ClientShared::new(
            Uuid::new_v4(),
            Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V1),
        ));
        *shared.worker_type.lock() = WorkerType::Miner;
        let (accepted, _rx) = ClientHandle::new(shared.clone());
        assert!(pool.add_worker(accepted));

        shared.ban_pool(&pool.shared.descriptor());
        let (banned, _rx) = ClientHandle::new(shared);
        assert!(!pool.add_worker(banned));
    }

    #[test]
    fn retiring_the_active_template_clears_it() {
        let (mut pool, _tx) = test_pool();
        pool.apply_job(nicehash_job("a"));
        pool.retire_template("a");
        assert!(pool.active_template.is_none());
        assert!(pool.templates.is_empty());
    }

    #[test]
    fn disconnect_fails_pending_submits() {
        let (mut pool, _tx) = test_pool();
        let (reply, mut rx) = oneshot::channel();
        pool.pending.insert(
            7,
            PendingRequest::Submit {
                template_job_id: "a".into(),
                reply,
            },
        );
        pool.login_id = Some("login".into());

        pool.handle_disconnect();

        assert_eq!(rx.try_recv().unwrap(), SubmitStatus::RejectedInvalidJobId);
        assert!(pool.login_id.is_none());
    }
}
