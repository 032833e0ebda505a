use super::*;

/// What a template mints for a worker: a hash-ready job for a miner, or a
/// whole subtemplate for a downstream proxy to fan out on its own.
#[derive(Debug, Clone)]
pub enum MintedJob {
    Miner(Job),
    SubTemplate(JobParams),
}

impl MintedJob {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Miner(job) => &job.job_id,
            Self::SubTemplate(params) => &params.job_id,
        }
    }
}

/// Where a submitted share ends up after walking its template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateVerdict {
    /// Stamped with its mint path and re-keyed to the top-level job id,
    /// ready for the pool.
    Forward(JobResult),
    Reject(StratumError),
}

/// The fan-out engine. A pool job becomes exactly one of these; miners and
/// downstream proxies draw subjobs from it and their shares are rewritten
/// on the way back up.
#[derive(Debug)]
pub enum JobTemplate {
    Master(MasterJobTemplate),
    Worker(WorkerJobTemplate),
    NiceHash(NiceHashJobTemplate),
    Solo(SoloJobTemplate),
}

impl JobTemplate {
    /// Builds the right template for a pool job: templates with a pool-nonce
    /// slot fan out twice, ready jobs with a free nice-hash byte fan out by
    /// nice hash, anything else can serve a single miner.
    pub fn from_job_params(params: &JobParams, default_algorithm: Algorithm) -> Result<Self> {
        let blob = params.to_blob()?;
        let algorithm = params.algorithm(default_algorithm);
        let job_id = params.job_id.clone();

        if blob.is_template() && blob.has_client_pool_offset() {
            let target_difficulty = params
                .target_diff
                .context("pool template without target_diff")? as u32;
            return Ok(Self::Master(MasterJobTemplate {
                job_id,
                algorithm,
                blob,
                difficulty: params.difficulty.unwrap_or_default(),
                height: params.height.unwrap_or_default(),
                target_difficulty,
                next_pool_nonce: 1,
                active_child: None,
                children: Vec::new(),
            }));
        }

        if !blob.is_template() && blob.nice_hash() == 0 {
            let target = params.parse_target()?;
            return Ok(Self::NiceHash(NiceHashJobTemplate {
                job_id,
                algorithm,
                blob,
                target,
                last_nice_hash: 0,
                minted: HashMap::new(),
                found_nonces: HashSet::new(),
            }));
        }

        let target = params.parse_target()?;
        Ok(Self::Solo(SoloJobTemplate {
            job_id,
            algorithm,
            blob,
            target,
            minted_job_id: None,
            found_nonces: HashSet::new(),
        }))
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::Master(t) => &t.job_id,
            Self::Worker(t) => &t.job_id,
            Self::NiceHash(t) => &t.job_id,
            Self::Solo(t) => &t.job_id,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Master(t) => t.algorithm,
            Self::Worker(t) => t.algorithm,
            Self::NiceHash(t) => t.algorithm,
            Self::Solo(t) => t.algorithm,
        }
    }

    /// The difficulty a share must prove to be worth forwarding.
    pub fn difficulty(&self) -> u32 {
        match self {
            Self::Master(t) => t.target_difficulty,
            Self::Worker(t) => t.target_difficulty,
            Self::NiceHash(t) => target_to_difficulty(t.target),
            Self::Solo(t) => target_to_difficulty(t.target),
        }
    }

    pub fn supports(&self, worker_type: WorkerType) -> bool {
        match self {
            Self::Master(_) => true,
            _ => worker_type != WorkerType::Proxy,
        }
    }

    /// Mints the next subjob for a worker, or `None` when this template has
    /// nothing left to hand out.
    pub fn get_job_for(
        &mut self,
        worker: WorkerIdentifier,
        worker_type: WorkerType,
    ) -> Result<Option<MintedJob>> {
        match self {
            Self::Master(t) => t.next_job(worker, worker_type),
            Self::Worker(t) => t.next_job(worker, worker_type),
            Self::NiceHash(t) => Ok(t.next_job(worker, worker_type)),
            Self::Solo(t) => Ok(t.next_job(worker, worker_type)),
        }
    }

    /// Walks a share back up the mint path.
    pub fn submit(&mut self, result: &JobResult) -> TemplateVerdict {
        match self {
            Self::Master(t) => t.submit(result),
            Self::Worker(t) => t.submit(result),
            Self::NiceHash(t) => t.submit(result),
            Self::Solo(t) => t.submit(result),
        }
    }
}

/// A pool template with both fan-out slots: it composes over
/// [`JobTemplate::Worker`] children keyed by pool nonce, routing every mint
/// and submit through the sum.
#[derive(Debug)]
pub struct MasterJobTemplate {
    job_id: String,
    algorithm: Algorithm,
    blob: Blob,
    difficulty: u64,
    height: u64,
    target_difficulty: u32,
    next_pool_nonce: u32,
    active_child: Option<usize>,
    children: Vec<(u32, JobTemplate)>,
}

impl MasterJobTemplate {
    fn next_job(
        &mut self,
        worker: WorkerIdentifier,
        worker_type: WorkerType,
    ) -> Result<Option<MintedJob>> {
        if worker_type == WorkerType::Proxy {
            // A downstream proxy consumes a fresh child whole.
            let index = self.mint_child()?;
            return self.children[index].1.get_job_for(worker, worker_type);
        }

        if let Some(index) = self.active_child {
            if let Some(job) = self.children[index].1.get_job_for(worker, worker_type)? {
                return Ok(Some(job));
            }
        }

        // Active child exhausted (or absent): mint a fresh one for miners.
        let index = self.mint_child()?;
        self.active_child = Some(index);
        self.children[index].1.get_job_for(worker, worker_type)
    }

    fn mint_child(&mut self) -> Result<usize> {
        let pool_nonce = self.next_pool_nonce;
        self.next_pool_nonce = self
            .next_pool_nonce
            .checked_add(1)
            .context("pool nonce space exhausted")?;

        let mut blob = self.blob.clone();
        blob.set_client_pool(pool_nonce);

        self.children.push((
            pool_nonce,
            JobTemplate::Worker(WorkerJobTemplate {
                job_id: Uuid::new_v4().to_string(),
                algorithm: self.algorithm,
                blob,
                difficulty: self.difficulty,
                height: self.height,
                target_difficulty: self.target_difficulty,
                next_client_nonce: 1,
                minted: HashMap::new(),
            }),
        ));
        Ok(self.children.len() - 1)
    }

    /// Probes the children; the one that minted the share answers with
    /// anything but an invalid job id, and the master stamps its pool nonce
    /// on the way up.
    fn submit(&mut self, result: &JobResult) -> TemplateVerdict {
        for (pool_nonce, child) in &mut self.children {
            match child.submit(result) {
                TemplateVerdict::Reject(StratumError::InvalidJobId) => continue,
                TemplateVerdict::Forward(mut forwarded) => {
                    forwarded.pool_nonce = Some(*pool_nonce);
                    forwarded.job_id = self.job_id.clone();
                    return TemplateVerdict::Forward(forwarded);
                }
                reject => return reject,
            }
        }

        TemplateVerdict::Reject(StratumError::InvalidJobId)
    }

    #[cfg(test)]
    pub(crate) fn pool_nonces(&self) -> Vec<u32> {
        self.children.iter().map(|(nonce, _)| *nonce).collect()
    }
}

/// One pool-nonce's slice of a master template; owns the worker-nonce
/// counter and mints hash-ready jobs for miners.
#[derive(Debug)]
pub struct WorkerJobTemplate {
    job_id: String,
    algorithm: Algorithm,
    blob: Blob,
    difficulty: u64,
    height: u64,
    target_difficulty: u32,
    next_client_nonce: u32,
    minted: HashMap<String, u32>,
}

impl WorkerJobTemplate {
    /// The template-job shape a downstream proxy consumes. All slot offsets
    /// travel with it so the downstream can keep fanning out and shares can
    /// be reconstructed byte-exactly.
    fn to_params(&self, worker: WorkerIdentifier) -> JobParams {
        let widen = |offset: Option<u32>| offset.map(|o| o as u64);
        JobParams {
            id: worker.to_string(),
            job_id: self.job_id.clone(),
            blocktemplate_blob: self.blob.to_hex(),
            difficulty: Some(self.difficulty),
            height: Some(self.height),
            reserved_offset: widen(self.blob.reserved_offset()),
            client_nonce_offset: widen(self.blob.client_nonce_offset()),
            client_pool_offset: widen(self.blob.client_pool_offset()),
            target_diff: Some(self.target_difficulty as u64),
            algo: Some(self.algorithm.kind.as_str().into()),
            variant: Some(self.algorithm.variant.as_str().into()),
            ..Default::default()
        }
    }

    fn next_job(
        &mut self,
        worker: WorkerIdentifier,
        worker_type: WorkerType,
    ) -> Result<Option<MintedJob>> {
        if worker_type == WorkerType::Proxy {
            // A downstream proxy takes the template whole and fans the
            // worker-nonce space out on its own.
            return Ok(Some(MintedJob::SubTemplate(self.to_params(worker))));
        }

        let client_nonce = self.next_client_nonce;
        let Some(next) = client_nonce.checked_add(1) else {
            return Ok(None);
        };

        let mut blob = self.blob.clone();
        blob.set_client_nonce(client_nonce);
        let blob = blob.to_hash_blob()?;

        let job = Job {
            assigned_worker: worker,
            job_id: Uuid::new_v4().to_string(),
            blob,
            target: difficulty_to_target(self.target_difficulty),
            algorithm: self.algorithm,
        };
        self.minted.insert(job.job_id.clone(), client_nonce);
        self.next_client_nonce = next;
        Ok(Some(MintedJob::Miner(job)))
    }

    fn submit(&mut self, result: &JobResult) -> TemplateVerdict {
        // A share from a downstream proxy arrives under this template's own
        // id with its worker nonce already stamped; a miner share arrives
        // under its leaf job id.
        let worker_nonce = if result.job_id == self.job_id {
            match result.worker_nonce {
                Some(worker_nonce) => worker_nonce,
                None => return TemplateVerdict::Reject(StratumError::InvalidJobId),
            }
        } else {
            match self.minted.get(&result.job_id) {
                Some(worker_nonce) => *worker_nonce,
                None => return TemplateVerdict::Reject(StratumError::InvalidJobId),
            }
        };

        if result.difficulty() < self.target_difficulty {
            return TemplateVerdict::Reject(StratumError::LowDifficulty);
        }

        let mut forwarded = result.clone();
        forwarded.worker_nonce = Some(worker_nonce);
        forwarded.job_id = self.job_id.clone();
        TemplateVerdict::Forward(forwarded)
    }
}

/// A ready pool job whose nice-hash byte is free: one subjob per nice-hash
/// value, 255 in total.
#[derive(Debug)]
pub struct NiceHashJobTemplate {
    job_id: String,
    algorithm: Algorithm,
    blob: Blob,
    target: Target,
    last_nice_hash: u8,
    minted: HashMap<String, u8>,
    found_nonces: HashSet<u32>,
}

impl NiceHashJobTemplate {
    fn next_job(&mut self, worker: WorkerIdentifier, worker_type: WorkerType) -> Option<MintedJob> {
        if worker_type == WorkerType::Proxy || self.last_nice_hash == u8::MAX {
            return None;
        }
        self.last_nice_hash += 1;

        let mut blob = self.blob.clone();
        blob.set_nice_hash(self.last_nice_hash);

        let job = Job {
            assigned_worker: worker,
            job_id: Uuid::new_v4().to_string(),
            blob,
            target: self.target,
            algorithm: self.algorithm,
        };
        self.minted.insert(job.job_id.clone(), self.last_nice_hash);
        Some(MintedJob::Miner(job))
    }

    fn submit(&mut self, result: &JobResult) -> TemplateVerdict {
        let Some(nice_hash) = self.minted.get(&result.job_id) else {
            return TemplateVerdict::Reject(StratumError::InvalidJobId);
        };
        // A nonce outside the subjob's nice-hash partition counts as
        // malformed, which the wire folds into the duplicate error.
        if result.nice_hash() != *nice_hash {
            return TemplateVerdict::Reject(StratumError::Duplicate);
        }
        if !self.found_nonces.insert(result.nonce) {
            return TemplateVerdict::Reject(StratumError::Duplicate);
        }

        let mut forwarded = result.clone();
        forwarded.job_id = self.job_id.clone();
        TemplateVerdict::Forward(forwarded)
    }
}

/// A pool job whose nice-hash byte is already taken: a single miner can work
/// on it and no further fan-out is possible.
#[derive(Debug)]
pub struct SoloJobTemplate {
    job_id: String,
    algorithm: Algorithm,
    blob: Blob,
    target: Target,
    minted_job_id: Option<String>,
    found_nonces: HashSet<u32>,
}

impl SoloJobTemplate {
    fn next_job(&mut self, worker: WorkerIdentifier, worker_type: WorkerType) -> Option<MintedJob> {
        if worker_type == WorkerType::Proxy || self.minted_job_id.is_some() {
            return None;
        }

        let blob = match self.blob.to_hash_blob() {
            Ok(blob) => blob,
            Err(_) => return None,
        };

        let job = Job {
            assigned_worker: worker,
            job_id: Uuid::new_v4().to_string(),
            blob,
            target: self.target,
            algorithm: self.algorithm,
        };
        self.minted_job_id = Some(job.job_id.clone());
        Some(MintedJob::Miner(job))
    }

    fn submit(&mut self, result: &JobResult) -> TemplateVerdict {
        if self.minted_job_id.as_deref() != Some(&result.job_id) {
            return TemplateVerdict::Reject(StratumError::InvalidJobId);
        }
        // The nice-hash byte is fixed here; a differing one is a malformed
        // nonce, reported as a duplicate.
        if result.nice_hash() != self.blob.nice_hash() {
            return TemplateVerdict::Reject(StratumError::Duplicate);
        }
        if !self.found_nonces.insert(result.nonce) {
            return TemplateVerdict::Reject(StratumError::Duplicate);
        }

        let mut forwarded = result.clone();
        forwarded.job_id = self.job_id.clone();
        TemplateVerdict::Forward(forwarded)
    }
}
