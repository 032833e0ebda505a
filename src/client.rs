use super::*;

/// The session must be at least this old before measured rates start
/// driving the announced difficulty.
const MIN_AGE_FOR_RETARGET: Duration = Duration::from_secs(10);

/// What a locally verified share difficulty means for one submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareGate {
    /// Below the difficulty announced to the worker: reject outright.
    Reject,
    /// Good enough for the worker's announced difficulty but not the job's:
    /// acknowledge and swallow.
    AcceptLocally,
    /// Meets the job difficulty: acknowledge and forward to the pool.
    Forward,
}

pub fn gate_share(result_difficulty: u32, announced: u32, job: u32) -> ShareGate {
    if result_difficulty < announced {
        ShareGate::Reject
    } else if result_difficulty < job {
        ShareGate::AcceptLocally
    } else {
        ShareGate::Forward
    }
}

pub fn worker_type_for_agent(agent: &str) -> WorkerType {
    if agent.contains("xmr-node-proxy") {
        WorkerType::Proxy
    } else {
        WorkerType::Miner
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub username: String,
    pub password: String,
    pub agent: String,
    pub kind: AlgorithmKind,
    pub variants: Vec<AlgorithmVariant>,
    pub logged_in: bool,
}

/// Client state shared with the proxy, its pool, and telemetry. Only the
/// session task mutates it.
pub struct ClientShared {
    pub id: WorkerIdentifier,
    pub connected: AtomicBool,
    pub banned_pools: Mutex<HashSet<String>>,
    pub worker_type: Mutex<WorkerType>,
    pub session: Mutex<SessionInfo>,
    pub hash_rate: Mutex<HashRateCalculator>,
    pub total_submits: AtomicU64,
    pub good_submits: AtomicU64,
}

impl ClientShared {
    pub fn new(id: WorkerIdentifier, default_algorithm: Algorithm) -> Self {
        Self {
            id,
            connected: AtomicBool::new(true),
            banned_pools: Mutex::new(HashSet::new()),
            worker_type: Mutex::new(WorkerType::Unknown),
            session: Mutex::new(SessionInfo {
                username: String::new(),
                password: String::new(),
                agent: String::new(),
                kind: default_algorithm.kind,
                variants: vec![default_algorithm.variant],
                logged_in: false,
            }),
            hash_rate: Mutex::new(HashRateCalculator::new()),
            total_submits: AtomicU64::new(0),
            good_submits: AtomicU64::new(0),
        }
    }

    pub fn worker_type(&self) -> WorkerType {
        *self.worker_type.lock()
    }

    /// Whether this worker can hash jobs of the given algorithm.
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        let session = self.session.lock();
        session.kind == algorithm.kind
            && (algorithm.variant == AlgorithmVariant::Any
                || session.variants.contains(&AlgorithmVariant::Any)
                || session.variants.contains(&algorithm.variant))
    }

    /// Records that the named pool banned this worker's address. Assignment
    /// and rebalancing stop offering that pool to this worker; other pools
    /// stay eligible.
    pub fn ban_pool(&self, descriptor: &str) {
        self.banned_pools.lock().insert(descriptor.to_string());
    }

    pub fn is_banned_from(&self, descriptor: &str) -> bool {
        self.banned_pools.lock().contains(descriptor)
    }

    pub fn username(&self) -> String {
        self.session.lock().username.clone()
    }

    pub fn average_hash_rate(&self) -> f64 {
        self.hash_rate.lock().average_medium()
    }
}

pub enum ClientCommand {
    AssignPool(PoolHandle),
    NewJob(Box<MintedJob>),
    RevokeJob,
}

#[derive(Clone)]
pub struct ClientHandle {
    pub id: WorkerIdentifier,
    pub shared: Arc<ClientShared>,
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    pub fn new(shared: Arc<ClientShared>) -> (Self, mpsc::UnboundedReceiver<ClientCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: shared.id,
                shared,
                tx,
            },
            rx,
        )
    }

    pub fn assign_pool(&self, pool: PoolHandle) {
        let _ = self.tx.send(ClientCommand::AssignPool(pool));
    }

    pub fn send_job(&self, minted: MintedJob) {
        let _ = self.tx.send(ClientCommand::NewJob(Box::new(minted)));
    }

    pub fn revoke_job(&self) {
        let _ = self.tx.send(ClientCommand::RevokeJob);
    }
}

struct JobEntry {
    minted: MintedJob,
    announced_difficulty: u32,
    job_difficulty: u32,
}

/// One downstream worker session.
pub struct Client {
    id: WorkerIdentifier,
    shared: Arc<ClientShared>,
    rx: mpsc::UnboundedReceiver<ClientCommand>,
    peer: SocketAddr,
    pool: Option<PoolHandle>,
    jobs: HashMap<String, JobEntry>,
    current_job: Option<String>,
    share_cache: HashSet<(String, u32)>,
    client_difficulty: u32,
    target_seconds_between_submits: u64,
    default_algorithm: Algorithm,
}

impl Client {
    pub fn new(
        shared: Arc<ClientShared>,
        rx: mpsc::UnboundedReceiver<ClientCommand>,
        peer: SocketAddr,
        server: &ServerConfig,
    ) -> Self {
        Self {
            id: shared.id,
            shared,
            rx,
            peer,
            pool: None,
            jobs: HashMap::new(),
            current_job: None,
            share_cache: HashSet::new(),
            client_difficulty: server.default_difficulty,
            target_seconds_between_submits: server.target_seconds_between_submits,
            default_algorithm: server.default_algorithm(),
        }
    }

    pub async fn serve(mut self, stream: BoxedStream, cancel: CancellationToken) -> Result {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(command) = self.rx.recv() => {
                    self.handle_command(command, &mut writer).await?;
                }

                // A cancelled read leaves its partial line in the buffer, so
                // it is only cleared after a whole line was handled.
                read = reader.read_line(&mut line) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => {
                            self.handle_line(line.trim(), &mut writer).await?;
                            line.clear();
                        }
                        Err(err) => {
                            debug!("<{}@{}> read error: {err}", self.id, self.peer);
                            break;
                        }
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn handle_command<W: AsyncWrite + Unpin>(
        &mut self,
        command: ClientCommand,
        writer: &mut W,
    ) -> Result {
        match command {
            ClientCommand::AssignPool(pool) => {
                debug!("<{}> assigned to pool {}", self.id, pool.shared.descriptor());
                self.pool = Some(pool);
                self.jobs.clear();
                self.current_job = None;
                self.share_cache.clear();
                self.request_job(writer).await?;
            }
            ClientCommand::NewJob(minted) => {
                self.install_job(*minted, writer).await?;
            }
            ClientCommand::RevokeJob => {
                debug!("<{}> job revoked, requesting a fresh one", self.id);
                self.jobs.clear();
                self.current_job = None;
                self.request_job(writer).await?;
            }
        }
        Ok(())
    }

    async fn request_job<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result {
        let Some(pool) = self.pool.clone() else {
            return Ok(());
        };
        if let Some(minted) = pool.get_job(self.id, self.shared.worker_type()).await {
            self.install_job(minted, writer).await?;
        }
        Ok(())
    }

    /// Stores a minted job as current and, once the worker is logged in,
    /// announces it.
    async fn install_job<W: AsyncWrite + Unpin>(
        &mut self,
        minted: MintedJob,
        writer: &mut W,
    ) -> Result {
        let job_id = minted.job_id().to_string();

        let (announced_difficulty, job_difficulty) = match &minted {
            MintedJob::Miner(job) => {
                let job_difficulty = job.difficulty();
                (
                    self.client_difficulty.clamp(1, job_difficulty.max(1)),
                    job_difficulty,
                )
            }
            MintedJob::SubTemplate(params) => {
                let difficulty = params.target_diff.unwrap_or_default() as u32;
                (difficulty, difficulty)
            }
        };

        let entry = JobEntry {
            minted,
            announced_difficulty,
            job_difficulty,
        };
        let params = entry_params(&entry);

        debug!(
            "<{}> new job {job_id}: announced difficulty {announced_difficulty}, job difficulty {job_difficulty}",
            self.id,
        );

        self.jobs.insert(job_id.clone(), entry);
        self.current_job = Some(job_id);

        if self.shared.session.lock().logged_in {
            self.notify(writer, "job", serde_json::to_value(params)?)
                .await?;
        }
        Ok(())
    }

    async fn handle_line<W: AsyncWrite + Unpin>(&mut self, line: &str, writer: &mut W) -> Result {
        if line.is_empty() {
            return Ok(());
        }

        let message: Message = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                warn!("<{}@{}> unparseable line: {err}", self.id, self.peer);
                return Ok(());
            }
        };

        let Message::Request { id, method, params } = message else {
            debug!("<{}> ignoring non-request message", self.id);
            return Ok(());
        };

        match parse_server_request(&method, params) {
            Ok(ServerRequest::Login(login)) => self.handle_login(id, login, writer).await,
            Ok(ServerRequest::GetJob) => self.handle_get_job(id, writer).await,
            Ok(ServerRequest::Submit(submit)) => self.handle_submit(id, submit, writer).await,
            Ok(ServerRequest::Keepalived(keepalive)) => {
                if keepalive.id == self.id.to_string() {
                    self.respond(writer, id, serde_json::to_value(StatusResult::keepalived())?)
                        .await
                } else {
                    self.respond_error(writer, id, StratumError::Unauthenticated)
                        .await
                }
            }
            Err(error) => self.respond_error(writer, id, error).await,
        }
    }

    async fn handle_login<W: AsyncWrite + Unpin>(
        &mut self,
        id: Id,
        login: LoginParams,
        writer: &mut W,
    ) -> Result {
        if login.login.is_empty() {
            self.shared.session.lock().logged_in = false;
            return self
                .respond_error(writer, id, StratumError::MissingLogin)
                .await;
        }

        let worker_type = worker_type_for_agent(&login.agent);
        *self.shared.worker_type.lock() = worker_type;

        {
            let mut session = self.shared.session.lock();
            session.username = login.login.clone();
            session.password = login.pass.clone();
            session.agent = login.agent.clone();
            if let Some(kind) = login.algo.as_deref().and_then(|s| s.parse().ok()) {
                session.kind = kind;
            }
            let variants = login.variants();
            if !variants.is_empty() {
                session.variants = variants;
            }
        }

        info!(
            "<{}@{}> logged in as {} with {} ({:?})",
            self.id, self.peer, login.login, login.agent, worker_type,
        );

        if self.current_job.is_none() {
            self.request_job(writer).await?;
        }

        let job = self
            .current_job
            .as_ref()
            .and_then(|job_id| self.jobs.get(job_id))
            .map(entry_params);

        let result = LoginResult {
            id: self.id.to_string(),
            job,
            status: StatusResult::OK.into(),
        };
        self.respond(writer, id, serde_json::to_value(result)?)
            .await?;

        self.shared.session.lock().logged_in = true;
        Ok(())
    }

    async fn handle_get_job<W: AsyncWrite + Unpin>(&mut self, id: Id, writer: &mut W) -> Result {
        let job = self
            .current_job
            .as_ref()
            .and_then(|job_id| self.jobs.get(job_id))
            .map(entry_params);

        match job {
            Some(params) => {
                self.respond(writer, id, serde_json::to_value(params)?)
                    .await
            }
            None => {
                self.respond_error(writer, id, StratumError::NoJobAvailable)
                    .await
            }
        }
    }

    async fn handle_submit<W: AsyncWrite + Unpin>(
        &mut self,
        id: Id,
        submit: SubmitParams,
        writer: &mut W,
    ) -> Result {
        if submit.id != self.id.to_string() {
            return self
                .respond_error(writer, id, StratumError::Unauthenticated)
                .await;
        }

        let Some(entry) = self.jobs.get(&submit.job_id) else {
            return self
                .respond_error(writer, id, StratumError::InvalidJobId)
                .await;
        };
        let announced_difficulty = entry.announced_difficulty;
        let job_difficulty = entry.job_difficulty;

        let mut result = match JobResult::from_submit(&submit) {
            Ok(result) => result,
            Err(err) => {
                debug!("<{}> malformed submit: {err}", self.id);
                return self
                    .respond_error(writer, id, StratumError::InvalidMethod)
                    .await;
            }
        };

        if !self
            .share_cache
            .insert((submit.job_id.clone(), result.nonce))
        {
            return self
                .respond_error(writer, id, StratumError::Duplicate)
                .await;
        }

        // The hash is recomputed from the blob, never trusted from the
        // submit, and runs off the session loop.
        let verify = match verify_input(&self.jobs[&submit.job_id], &result, self.default_algorithm)
        {
            Ok(verify) => verify,
            Err(err) => {
                debug!("<{}> unverifiable submit: {err}", self.id);
                return self
                    .respond_error(writer, id, StratumError::InvalidMethod)
                    .await;
            }
        };
        let (input, algorithm) = verify;
        result.hash = task::spawn_blocking(move || algorithm.hash(&input))
            .await
            .context("hash verification task failed")?;

        let result_difficulty = result.difficulty();
        match gate_share(result_difficulty, announced_difficulty, job_difficulty) {
            ShareGate::Reject => {
                debug!(
                    "<{}> low difficulty share: {result_difficulty} < {announced_difficulty}",
                    self.id,
                );
                self.respond_error(writer, id, StratumError::LowDifficulty)
                    .await
            }
            gate => {
                self.respond(writer, id, serde_json::to_value(StatusResult::ok())?)
                    .await?;
                self.update_hash_rates(announced_difficulty);

                if gate == ShareGate::Forward {
                    self.forward_share(result).await;
                }
                Ok(())
            }
        }
    }

    async fn forward_share(&mut self, result: JobResult) {
        let Some(pool) = &self.pool else {
            return;
        };

        let verdict = pool.submit(result).await;
        let shared = self.shared.clone();
        let descriptor = pool.shared.descriptor();

        // The worker has already been acknowledged; the pool's verdict only
        // moves counters.
        tokio::spawn(async move {
            match verdict.await {
                Ok(status) => {
                    if status.is_accepted() {
                        shared.good_submits.fetch_add(1, Ordering::Relaxed);
                    } else if status == SubmitStatus::RejectedIpBanned {
                        warn!("<{}> address banned by pool {descriptor}", shared.id);
                        shared.ban_pool(&descriptor);
                    }
                    debug!("<{}> pool {descriptor} verdict: {status:?}", shared.id);
                }
                Err(_) => {
                    debug!("<{}> pool {descriptor} dropped the share verdict", shared.id);
                }
            }
        });
    }

    fn update_hash_rates(&mut self, announced_difficulty: u32) {
        self.shared.total_submits.fetch_add(1, Ordering::Relaxed);

        let mut hash_rate = self.shared.hash_rate.lock();
        hash_rate.add_hashes(announced_difficulty as u64);

        if hash_rate.average_medium() != 0.0 && hash_rate.age() > MIN_AGE_FOR_RETARGET {
            self.client_difficulty =
                (hash_rate.average_medium() * self.target_seconds_between_submits as f64) as u32;
        }

        debug!(
            "<{}> submit ok: submits {}, hashes {}, rate {:.1}, 1m {:.1}, 10m {:.1}, difficulty {}",
            self.id,
            self.shared.total_submits.load(Ordering::Relaxed),
            hash_rate.total_hashes(),
            hash_rate.last_rate(),
            hash_rate.average_short(),
            hash_rate.average_medium(),
            self.client_difficulty,
        );
    }

    async fn respond<W: AsyncWrite + Unpin>(&self, writer: &mut W, id: Id, result: Value) -> Result {
        self.send(writer, Message::response(id, result)).await
    }

    async fn respond_error<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        id: Id,
        error: StratumError,
    ) -> Result {
        self.send(writer, Message::error_response(id, error)).await
    }

    async fn notify<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        method: &str,
        params: Value,
    ) -> Result {
        self.send(writer, Message::notification(method, params))
            .await
    }

    async fn send<W: AsyncWrite + Unpin>(&self, writer: &mut W, message: Message) -> Result {
        writer
            .write_all(message.to_line().as_bytes())
            .await
            .context("worker socket write")?;
        writer.flush().await.context("worker socket flush")
    }
}

/// The wire shape a stored job is (re-)announced with.
fn entry_params(entry: &JobEntry) -> JobParams {
    match &entry.minted {
        MintedJob::Miner(job) => job.to_params(difficulty_to_target(entry.announced_difficulty)),
        MintedJob::SubTemplate(params) => params.clone(),
    }
}

/// Reconstructs the exact bytes the worker should have hashed. For a
/// fanned-out subtemplate the downstream's worker nonce is written back in
/// before collapsing.
fn verify_input(
    entry: &JobEntry,
    result: &JobResult,
    default_algorithm: Algorithm,
) -> Result<(Vec<u8>, Algorithm)> {
    match &entry.minted {
        MintedJob::Miner(job) => {
            let mut blob = job.blob.clone();
            blob.set_nonce(result.nonce);
            Ok((blob.bytes().to_vec(), job.algorithm))
        }
        MintedJob::SubTemplate(params) => {
            let worker_nonce = result
                .worker_nonce
                .context("proxy share without workerNonce")?;
            let mut blob = params.to_blob()?;
            blob.set_client_nonce(worker_nonce);
            if let Some(pool_nonce) = result.pool_nonce {
                blob.set_client_pool(pool_nonce);
            }
            let mut blob = blob.to_hash_blob()?;
            blob.set_nonce(result.nonce);
            Ok((blob.bytes().to_vec(), params.algorithm(default_algorithm)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_gating_thresholds() {
        // Announced 10_000, job 15_000: the S5 case rejects at 9_000.
        assert_eq!(gate_share(9_000, 10_000, 15_000), ShareGate::Reject);
        assert_eq!(gate_share(10_000, 10_000, 15_000), ShareGate::AcceptLocally);
        assert_eq!(gate_share(14_999, 10_000, 15_000), ShareGate::AcceptLocally);
        assert_eq!(gate_share(15_000, 10_000, 15_000), ShareGate::Forward);
        assert_eq!(gate_share(u32::MAX, 10_000, 15_000), ShareGate::Forward);
    }

    #[test]
    fn agent_string_classifies_worker_type() {
        assert_eq!(
            worker_type_for_agent("xmr-node-proxy/0.0.3"),
            WorkerType::Proxy
        );
        assert_eq!(
            worker_type_for_agent("some xmr-node-proxy fork"),
            WorkerType::Proxy
        );
        assert_eq!(worker_type_for_agent("XMRig/2.6.4"), WorkerType::Miner);
        assert_eq!(worker_type_for_agent(""), WorkerType::Miner);
    }

    #[test]
    fn shared_supports_respects_variants() {
        let shared = ClientShared::new(
            Uuid::new_v4(),
            Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V1),
        );

        let v1 = Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V1);
        let v0 = Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V0);
        let any = Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::Any);
        let lite = Algorithm::new(AlgorithmKind::CryptonightLite, AlgorithmVariant::V1);

        assert!(shared.supports(v1));
        assert!(!shared.supports(v0));
        assert!(shared.supports(any));
        assert!(!shared.supports(lite));

        shared.session.lock().variants = vec![AlgorithmVariant::Any];
        assert!(shared.supports(v0));
    }

    #[test]
    fn banned_pools_are_remembered_per_pool() {
        let shared = ClientShared::new(Uuid::new_v4(), Algorithm::default());

        assert!(!shared.is_banned_from("pool-a.example.com:3333"));
        shared.ban_pool("pool-a.example.com:3333");

        assert!(shared.is_banned_from("pool-a.example.com:3333"));
        assert!(!shared.is_banned_from("pool-b.example.com:3333"));
    }

    #[test]
    fn miner_entry_reannounces_the_recorded_difficulty() {
        let worker = Uuid::new_v4();
        let entry = JobEntry {
            minted: MintedJob::Miner(Job {
                assigned_worker: worker,
                job_id: "leaf".into(),
                blob: Blob::new(vec![0u8; 76], false, None, None, None).unwrap(),
                target: difficulty_to_target(50_000),
                algorithm: Algorithm::default(),
            }),
            announced_difficulty: 8_000,
            job_difficulty: 50_000,
        };

        let params = entry_params(&entry);
        assert_eq!(params.target, "26310800");
        assert_eq!(params.job_id, "leaf");
        assert_eq!(params.id, worker.to_string());
    }

    #[test]
    fn verify_input_writes_the_nonce() {
        let entry = JobEntry {
            minted: MintedJob::Miner(Job {
                assigned_worker: Uuid::new_v4(),
                job_id: "leaf".into(),
                blob: Blob::new(vec![0u8; 76], false, None, None, None).unwrap(),
                target: difficulty_to_target(1000),
                algorithm: Algorithm::default(),
            }),
            announced_difficulty: 1000,
            job_difficulty: 1000,
        };

        let result = JobResult::new("leaf".into(), 0xdead_beef, [0u8; 32]);
        let (input, _) = verify_input(&entry, &result, Algorithm::default()).unwrap();
        assert_eq!(&input[39..43], &0xdead_beefu32.to_le_bytes());
    }
}
