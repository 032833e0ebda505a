use super::*;

/// The `job` payload: a notification's params, a `getjob` result, or the
/// `job` member of a login result.
///
/// Plain pool jobs carry `blob`/`target`; pools running the xmr-node-proxy
/// extension hand out block templates instead, with the fan-out offsets and
/// difficulties in the extension fields. Numeric extension fields arrive as
/// strings from some pools and as numbers from others, so they parse both
/// ways but serialize as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub blob: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_hash: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub blocktemplate_blob: String,
    #[serde(default, with = "stringly", skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u64>,
    #[serde(default, with = "stringly", skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, with = "stringly", skip_serializing_if = "Option::is_none")]
    pub reserved_offset: Option<u64>,
    #[serde(default, with = "stringly", skip_serializing_if = "Option::is_none")]
    pub client_nonce_offset: Option<u64>,
    #[serde(default, with = "stringly", skip_serializing_if = "Option::is_none")]
    pub client_pool_offset: Option<u64>,
    #[serde(default, with = "stringly", skip_serializing_if = "Option::is_none")]
    pub target_diff: Option<u64>,
}

impl JobParams {
    pub fn is_template(&self) -> bool {
        !self.blocktemplate_blob.is_empty()
    }

    /// The blob this job hands out: the template form when present, the
    /// ready-to-hash form otherwise.
    pub fn to_blob(&self) -> Result<Blob> {
        let is_template = self.is_template();
        let hex = if is_template {
            &self.blocktemplate_blob
        } else {
            &self.blob
        };
        let narrow = |offset: Option<u64>| offset.map(|o| o as u32);
        Blob::from_hex(
            hex,
            is_template,
            narrow(self.reserved_offset),
            narrow(self.client_nonce_offset),
            narrow(self.client_pool_offset),
        )
    }

    pub fn parse_target(&self) -> Result<Target> {
        self.target.parse()
    }

    pub fn algorithm(&self, default: Algorithm) -> Algorithm {
        let kind = self
            .algo
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default.kind);
        let variant = self
            .variant
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default.variant);
        Algorithm::new(kind, variant)
    }
}

/// Optional integers that serialize as strings and deserialize from either.
mod stringly {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            String(String),
        }

        match Option::<Wire>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Wire::Number(n)) => Ok(Some(n)),
            Some(Wire::String(s)) if s.is_empty() => Ok(None),
            Some(Wire::String(s)) => s.parse().map(Some).map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_job_round_trip() {
        let json = json!({
            "blob": hex::encode([6u8; 76]),
            "job_id": "meta-v1",
            "target": "8b4f0100",
            "id": "4f2b5b3a-7a3c-4d4e-9f42-08a1b2c3d4e5",
        });

        let job: JobParams = serde_json::from_value(json).unwrap();
        assert!(!job.is_template());
        assert_eq!(job.parse_target().unwrap(), Target::from_u32(0x0001_4f8b));
        assert!(job.to_blob().unwrap().bytes().len() > 39);

        let back = serde_json::to_value(&job).unwrap();
        let again: JobParams = serde_json::from_value(back).unwrap();
        assert_eq!(again, job);
    }

    #[test]
    fn template_job_accepts_string_and_number_fields() {
        let json = json!({
            "blocktemplate_blob": hex::encode([7u8; 128]),
            "job_id": "t1",
            "difficulty": "120000",
            "height": 2_000_000,
            "reserved_offset": "55",
            "client_nonce_offset": 59,
            "client_pool_offset": "63",
            "target_diff": "30000",
        });

        let job: JobParams = serde_json::from_value(json).unwrap();
        assert!(job.is_template());
        assert_eq!(job.difficulty, Some(120000));
        assert_eq!(job.height, Some(2_000_000));
        assert_eq!(job.target_diff, Some(30000));

        let blob = job.to_blob().unwrap();
        assert!(blob.is_template());
        assert!(blob.has_client_pool_offset());
    }

    #[test]
    fn extension_numbers_serialize_as_strings() {
        let job = JobParams {
            blocktemplate_blob: "aa".repeat(80),
            height: Some(42),
            ..Default::default()
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["height"], json!("42"));
        assert!(value.get("difficulty").is_none());
    }

    #[test]
    fn algorithm_falls_back_to_the_default() {
        let mut job = JobParams::default();
        let default = Algorithm::new(AlgorithmKind::CryptonightLite, AlgorithmVariant::V1);
        assert_eq!(job.algorithm(default), default);

        job.algo = Some("cryptonight-heavy".into());
        job.variant = Some("xhv".into());
        assert_eq!(
            job.algorithm(default),
            Algorithm::new(AlgorithmKind::CryptonightHeavy, AlgorithmVariant::Xhv)
        );
    }
}
