use super::*;

pub type WorkerIdentifier = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerType {
    #[default]
    Unknown,
    Miner,
    Proxy,
}

/// The verdict a submitted share ends up with, locally or at the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    RejectedIpBanned,
    RejectedUnauthenticated,
    RejectedDuplicate,
    RejectedExpired,
    RejectedInvalidJobId,
    RejectedLowDifficulty,
}

impl SubmitStatus {
    /// The upstream error-message mapping; anything unrecognized counts as
    /// an invalid job id.
    pub fn from_error_message(message: &str) -> Self {
        match StratumError::from_message(message) {
            Some(StratumError::Unauthenticated) => Self::RejectedUnauthenticated,
            Some(StratumError::IpBanned) => Self::RejectedIpBanned,
            Some(StratumError::Duplicate) => Self::RejectedDuplicate,
            Some(StratumError::Expired) => Self::RejectedExpired,
            Some(StratumError::LowDifficulty) => Self::RejectedLowDifficulty,
            _ => Self::RejectedInvalidJobId,
        }
    }

    /// Local template verdicts map directly; the errors that only exist at
    /// the session boundary fold into an invalid job id.
    pub fn from_stratum_error(error: StratumError) -> Self {
        match error {
            StratumError::Unauthenticated => Self::RejectedUnauthenticated,
            StratumError::IpBanned => Self::RejectedIpBanned,
            StratumError::Duplicate => Self::RejectedDuplicate,
            StratumError::Expired => Self::RejectedExpired,
            StratumError::LowDifficulty => Self::RejectedLowDifficulty,
            _ => Self::RejectedInvalidJobId,
        }
    }

    pub fn error(self) -> Option<StratumError> {
        match self {
            Self::Accepted => None,
            Self::RejectedIpBanned => Some(StratumError::IpBanned),
            Self::RejectedUnauthenticated => Some(StratumError::Unauthenticated),
            Self::RejectedDuplicate => Some(StratumError::Duplicate),
            Self::RejectedExpired => Some(StratumError::Expired),
            Self::RejectedInvalidJobId => Some(StratumError::InvalidJobId),
            Self::RejectedLowDifficulty => Some(StratumError::LowDifficulty),
        }
    }

    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// A hash-ready subjob assigned to one worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub assigned_worker: WorkerIdentifier,
    pub job_id: String,
    pub blob: Blob,
    pub target: Target,
    pub algorithm: Algorithm,
}

impl Job {
    pub fn difficulty(&self) -> u32 {
        target_to_difficulty(self.target)
    }

    /// The wire shape announced to the worker. The target announced may be
    /// easier than the job's own, per the worker's difficulty controller.
    pub fn to_params(&self, announced_target: Target) -> JobParams {
        JobParams {
            id: self.assigned_worker.to_string(),
            job_id: self.job_id.clone(),
            blob: self.blob.to_hex(),
            target: announced_target.to_hex(4),
            algo: Some(self.algorithm.kind.as_str().into()),
            variant: Some(self.algorithm.variant.as_str().into()),
            ..Default::default()
        }
    }
}

/// A share, parsed off the wire and carried up the template tree. The
/// template path stamps `worker_nonce`/`pool_nonce` as it forwards.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub nonce: u32,
    pub hash: [u8; 32],
    pub worker_nonce: Option<u32>,
    pub pool_nonce: Option<u32>,
}

impl JobResult {
    pub fn new(job_id: String, nonce: u32, hash: [u8; 32]) -> Self {
        Self {
            job_id,
            nonce,
            hash,
            worker_nonce: None,
            pool_nonce: None,
        }
    }

    pub fn from_submit(submit: &SubmitParams) -> Result<Self> {
        let narrow = |hex: &Option<String>| -> Result<Option<u32>> {
            hex.as_deref().map(nonce_from_hex).transpose()
        };
        Ok(Self {
            job_id: submit.job_id.clone(),
            nonce: submit.parse_nonce()?,
            hash: submit.parse_result()?,
            worker_nonce: narrow(&submit.worker_nonce)?,
            pool_nonce: narrow(&submit.pool_nonce)?,
        })
    }

    /// The nice-hash byte is the high byte of the in-blob nonce, which is
    /// the low byte of its integer value.
    pub fn nice_hash(&self) -> u8 {
        self.nonce as u8
    }

    pub fn difficulty(&self) -> u32 {
        difficulty_of_hash(&self.hash)
    }

    /// The upstream submit for this share, issued under the pool's login.
    pub fn to_submit(&self, login_id: &str) -> SubmitParams {
        SubmitParams {
            id: login_id.into(),
            job_id: self.job_id.clone(),
            nonce: nonce_to_hex(self.nonce),
            result: hex::encode(self.hash),
            worker_nonce: self.worker_nonce.map(nonce_to_hex),
            pool_nonce: self.pool_nonce.map(nonce_to_hex),
        }
    }
}
