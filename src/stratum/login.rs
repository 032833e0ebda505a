use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginParams {
    pub login: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algo: Option<String>,
    #[serde(default, rename = "algo-perf", skip_serializing_if = "Option::is_none")]
    pub algo_perf: Option<Vec<String>>,
}

impl LoginParams {
    /// The algorithm variants a worker advertises, from its `algo-perf`
    /// entries. Entries come both bare (`"1"`) and prefixed (`"cn/1"`).
    pub fn variants(&self) -> Vec<AlgorithmVariant> {
        self.algo_perf
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| {
                entry
                    .parse()
                    .or_else(|_| entry.rsplit('/').next().unwrap_or_default().parse())
                    .ok()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobParams>,
    pub status: String,
}

/// The `{"status": ...}` result shared by submit and keepalive replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResult {
    pub status: String,
}

impl StatusResult {
    pub const OK: &'static str = "OK";
    pub const KEEPALIVED: &'static str = "KEEPALIVED";

    pub fn ok() -> Self {
        Self {
            status: Self::OK.into(),
        }
    }

    pub fn keepalived() -> Self {
        Self {
            status: Self::KEEPALIVED.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_minimal() {
        let params: LoginParams =
            serde_json::from_value(json!({"login": "wallet"})).unwrap();
        assert_eq!(params.login, "wallet");
        assert_eq!(params.pass, "");
        assert!(params.variants().is_empty());
    }

    #[test]
    fn login_with_algo_perf() {
        let params: LoginParams = serde_json::from_value(json!({
            "login": "wallet",
            "pass": "x",
            "agent": "xmr-node-proxy/0.0.3",
            "algo": "cryptonight",
            "algo-perf": ["cn/1", "2", "bogus"],
        }))
        .unwrap();

        assert_eq!(
            params.variants(),
            vec![AlgorithmVariant::V1, AlgorithmVariant::V2]
        );
    }

    #[test]
    fn login_result_omits_absent_job() {
        let result = LoginResult {
            id: "11111111-2222-3333-4444-555555555555".into(),
            job: None,
            status: StatusResult::OK.into(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("job").is_none());
        assert_eq!(value["status"], "OK");
    }

    #[test]
    fn status_result_round_trip() {
        let value = serde_json::to_value(StatusResult::keepalived()).unwrap();
        assert_eq!(value, json!({"status": "KEEPALIVED"}));
        assert!(!serde_json::from_value::<StatusResult>(value).unwrap().is_ok());
    }
}
