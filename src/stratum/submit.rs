use super::*;

/// A share submission, downstream or upstream. `worker_nonce` and
/// `pool_nonce` only appear on the upstream side when the share came out of
/// a template fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitParams {
    pub id: String,
    pub job_id: String,
    pub nonce: String,
    pub result: String,
    #[serde(
        default,
        rename = "workerNonce",
        skip_serializing_if = "Option::is_none"
    )]
    pub worker_nonce: Option<String>,
    #[serde(default, rename = "poolNonce", skip_serializing_if = "Option::is_none")]
    pub pool_nonce: Option<String>,
}

impl SubmitParams {
    pub fn parse_nonce(&self) -> Result<u32> {
        nonce_from_hex(&self.nonce)
    }

    pub fn parse_result(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.result).context("invalid result hex")?;
        bytes
            .try_into()
            .map_err(|_| anyhow!("result hash is not 32 bytes"))
    }
}

/// Nonces travel as the little-endian hex of their four bytes.
pub fn nonce_from_hex(nonce: &str) -> Result<u32> {
    let bytes = hex::decode(nonce).with_context(|| format!("invalid nonce hex `{nonce}`"))?;
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| anyhow!("nonce `{nonce}` is not 4 bytes"))?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn nonce_to_hex(nonce: u32) -> String {
    hex::encode(nonce.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_hex_is_little_endian() {
        assert_eq!(nonce_to_hex(0x0102_0304), "04030201");
        assert_eq!(nonce_from_hex("04030201").unwrap(), 0x0102_0304);
        assert_eq!(nonce_from_hex(&nonce_to_hex(0xdead_beef)).unwrap(), 0xdead_beef);
    }

    #[test]
    fn nonce_hex_rejects_bad_widths() {
        assert!(nonce_from_hex("0403").is_err());
        assert!(nonce_from_hex("040302015").is_err());
        assert!(nonce_from_hex("zzzzzzzz").is_err());
    }

    #[test]
    fn submit_round_trip() {
        let submit = SubmitParams {
            id: "worker-uuid".into(),
            job_id: "job-uuid".into(),
            nonce: nonce_to_hex(7),
            result: "aa".repeat(32),
            worker_nonce: None,
            pool_nonce: None,
        };

        let value = serde_json::to_value(&submit).unwrap();
        assert!(value.get("workerNonce").is_none());
        assert_eq!(serde_json::from_value::<SubmitParams>(value).unwrap(), submit);

        assert_eq!(submit.parse_nonce().unwrap(), 7);
        assert_eq!(submit.parse_result().unwrap(), [0xaa; 32]);
    }

    #[test]
    fn fanned_out_submit_carries_path_nonces() {
        let json = json!({
            "id": "pool-login-id",
            "job_id": "template-uuid",
            "nonce": "01000000",
            "result": "bb".repeat(32),
            "workerNonce": "02000000",
            "poolNonce": "03000000",
        });

        let submit: SubmitParams = serde_json::from_value(json).unwrap();
        assert_eq!(nonce_from_hex(submit.worker_nonce.as_deref().unwrap()).unwrap(), 2);
        assert_eq!(nonce_from_hex(submit.pool_nonce.as_deref().unwrap()).unwrap(), 3);
    }
}
