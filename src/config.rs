use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Auto,
    Tcp,
    Tls,
}

/// The configuration document: one JSON object wiring pools, downstream
/// server endpoints, and the optional remote-control client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "defaults::log_level")]
    pub log_level: u32,
    #[serde(default)]
    pub threads: usize,
    #[serde(default = "defaults::pool_load_balance_interval_seconds")]
    pub pool_load_balance_interval_seconds: u64,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub server: Vec<ServerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_client: Option<CcClientConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&text)
            .with_context(|| format!("malformed configuration file {}", path.display()))?;
        config.normalize_weights();
        Ok(config)
    }

    /// Clamps negative pool weights to zero and scales the rest so they sum
    /// to one.
    pub fn normalize_weights(&mut self) {
        for pool in &mut self.pools {
            pool.weight = pool.weight.max(0.0);
        }
        let total: f64 = self.pools.iter().map(|pool| pool.weight).sum();
        if total > 0.0 {
            for pool in &mut self.pools {
                pool.weight /= total;
            }
        }
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.pool_load_balance_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub connection_type: ConnectionType,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<AlgorithmKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm_variant: Option<AlgorithmVariant>,
}

impl PoolConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            connection_type: self.connection_type,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::new(
            self.algorithm.unwrap_or_default(),
            self.algorithm_variant.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_chain_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub default_algorithm: AlgorithmKind,
    #[serde(default)]
    pub default_algorithm_variant: AlgorithmVariant,
    #[serde(default = "defaults::default_difficulty")]
    pub default_difficulty: u32,
    #[serde(default = "defaults::target_seconds_between_submits")]
    pub target_seconds_between_submits: u64,
}

impl ServerConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            connection_type: self.connection_type,
        }
    }

    pub fn default_algorithm(&self) -> Algorithm {
        Algorithm::new(self.default_algorithm, self.default_algorithm_variant)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcClientConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub worker_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "defaults::update_interval_seconds")]
    pub update_interval_seconds: u64,
}

impl CcClientConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            connection_type: self.connection_type,
        }
    }
}

mod defaults {
    pub fn log_level() -> u32 {
        4
    }

    pub fn pool_load_balance_interval_seconds() -> u64 {
        20
    }

    pub fn default_difficulty() -> u32 {
        5000
    }

    pub fn target_seconds_between_submits() -> u64 {
        15
    }

    pub fn update_interval_seconds() -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "logLevel": 3,
            "threads": 8,
            "poolLoadBalanceIntervalSeconds": 45,
            "pools": [
                {
                    "host": "pool-a.example.com",
                    "port": 3333,
                    "connectionType": "tcp",
                    "username": "wallet-a",
                    "password": "x",
                    "weight": 7,
                    "algorithm": "cryptonight"
                },
                {
                    "host": "pool-b.example.com",
                    "port": 443,
                    "connectionType": "auto",
                    "username": "wallet-b",
                    "password": "x",
                    "weight": 3
                }
            ],
            "server": [
                {
                    "host": "0.0.0.0",
                    "port": 4444,
                    "connectionType": "tcp",
                    "defaultAlgorithm": "cryptonight",
                    "defaultAlgorithmVariant": "1",
                    "defaultDifficulty": 8000,
                    "targetSecondsBetweenSubmits": 20
                }
            ],
            "ccClient": {
                "host": "cc.example.com",
                "port": 443,
                "connectionType": "tls",
                "workerId": "proxy-1",
                "accessToken": "secret",
                "updateIntervalSeconds": 30
            }
        })
    }

    #[test]
    fn parses_the_full_document() {
        let mut config: Config = serde_json::from_value(sample()).unwrap();
        config.normalize_weights();

        assert_eq!(config.log_level, 3);
        assert_eq!(config.threads, 8);
        assert_eq!(config.balance_interval(), Duration::from_secs(45));

        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pools[0].weight, 0.7);
        assert_eq!(config.pools[1].weight, 0.3);
        assert!(config.pools[1].endpoint().use_tls());
        assert_eq!(
            config.pools[0].algorithm(),
            Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::Any)
        );

        let server = &config.server[0];
        assert_eq!(server.default_difficulty, 8000);
        assert_eq!(server.target_seconds_between_submits, 20);
        assert_eq!(
            server.default_algorithm(),
            Algorithm::new(AlgorithmKind::Cryptonight, AlgorithmVariant::V1)
        );

        let cc = config.cc_client.unwrap();
        assert_eq!(cc.update_interval_seconds, 30);
        assert!(cc.endpoint().use_tls());
    }

    #[test]
    fn defaults_apply() {
        let config: Config = serde_json::from_value(json!({
            "pools": [],
            "server": []
        }))
        .unwrap();

        assert_eq!(config.log_level, 4);
        assert_eq!(config.threads, 0);
        assert_eq!(config.pool_load_balance_interval_seconds, 20);
        assert!(config.cc_client.is_none());
    }

    #[test]
    fn server_defaults_apply() {
        let server: ServerConfig = serde_json::from_value(json!({
            "host": "0.0.0.0",
            "port": 4444
        }))
        .unwrap();

        assert_eq!(server.default_difficulty, 5000);
        assert_eq!(server.target_seconds_between_submits, 15);
        assert_eq!(server.default_algorithm().kind, AlgorithmKind::Cryptonight);
        assert_eq!(
            server.default_algorithm().variant,
            AlgorithmVariant::Any
        );
    }

    #[test]
    fn negative_weights_are_clamped() {
        let mut config: Config = serde_json::from_value(json!({
            "pools": [
                {"host": "a", "port": 1, "username": "u", "password": "p", "weight": -1},
                {"host": "b", "port": 2, "username": "u", "password": "p", "weight": 2}
            ],
            "server": []
        }))
        .unwrap();
        config.normalize_weights();

        assert_eq!(config.pools[0].weight, 0.0);
        assert_eq!(config.pools[1].weight, 1.0);
    }

    #[test]
    fn load_rejects_malformed_files() {
        let path = std::env::temp_dir().join("cnproxy-config-test.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
        fs::remove_file(&path).ok();
    }
}
