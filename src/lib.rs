use {
    algorithm::{Algorithm, AlgorithmKind, AlgorithmVariant},
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    balancer::{Assignment, WorkerSample, plan_rebalance},
    blob::Blob,
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    clap::Parser,
    client::{Client, ClientHandle, ClientShared},
    config::{CcClientConfig, Config, ConnectionType, PoolConfig, ServerConfig},
    connection::{BoxedStream, Endpoint},
    difficulty::{difficulty_of_hash, difficulty_to_target, target_to_difficulty},
    hash_rate::HashRateCalculator,
    job::{Job, JobResult, SubmitStatus, WorkerIdentifier, WorkerType},
    job_template::{JobTemplate, MintedJob, TemplateVerdict},
    parking_lot::Mutex,
    pool::PoolHandle,
    proxy::ProxyHandle,
    serde::{
        Deserialize, Serialize, Serializer,
        de::{self, Deserializer},
    },
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    snafu::Snafu,
    std::{
        collections::{HashMap, HashSet},
        env,
        fmt::{self, Display, Formatter},
        fs, io,
        net::SocketAddr,
        ops::AddAssign,
        path::{Path, PathBuf},
        process,
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    },
    stratum::{
        Id, JobParams, KeepalivedParams, LoginParams, LoginResult, Message, RpcError,
        ServerRequest, StatusResult, StratumError, SubmitParams, nonce_from_hex, nonce_to_hex,
        parse_server_request,
    },
    target::Target,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
        signal::ctrl_c,
        sync::{mpsc, oneshot},
        task::{self, JoinSet},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_subscriber::EnvFilter,
    uuid::Uuid,
};

pub mod algorithm;
mod arguments;
pub mod balancer;
pub mod blob;
pub mod cc_client;
pub mod client;
pub mod config;
pub mod connection;
pub mod cryptonote;
pub mod difficulty;
pub mod hash_rate;
pub mod job;
pub mod job_template;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod stratum;
pub mod target;

/// The agent announced to pools; the suffix asks xmr-node-proxy style pools
/// for fan-out templates.
pub const USER_AGENT: &str =
    concat!("cnproxy/", env!("CARGO_PKG_VERSION"), " with xmr-node-proxy support");

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
    let arguments = match Arguments::try_parse() {
        Ok(arguments) => arguments,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 1,
                _ => -1,
            };
            let _ = err.print();
            process::exit(code);
        }
    };

    match arguments.run() {
        Err(err) => {
            eprintln!("error: {err}");
            if env::var_os("RUST_BACKTRACE")
                .map(|val| val == "1")
                .unwrap_or_default()
            {
                eprintln!("{}", err.backtrace());
            }
            process::exit(1);
        }
        Ok(()) => {
            process::exit(0);
        }
    }
}
