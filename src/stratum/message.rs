use super::*;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Clone)]
#[serde(untagged)]
pub enum Id {
    Null,
    Number(u64),
    String(String),
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// One line of the stratum protocol. Requests and notifications differ only
/// in carrying an id; responses carry exactly one of `result` and `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        result: Option<Value>,
        error: Option<RpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn request(id: Id, method: &str, params: Value) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn response(id: Id, result: Value) -> Self {
        Self::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: Id, error: StratumError) -> Self {
        Self::Response {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// The newline-terminated wire form.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).expect("message serialization is infallible");
        line.push('\n');
        line
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            Self::Request { id, method, params } => json!({
                "id": id,
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
            }),
            Self::Response { id, result, error } => match error {
                Some(error) => json!({
                    "id": id,
                    "jsonrpc": "2.0",
                    "error": error,
                }),
                None => json!({
                    "id": id,
                    "jsonrpc": "2.0",
                    "result": result,
                }),
            },
            Self::Notification { method, params } => json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
            }),
        };
        value.serialize(serializer)
    }
}

/// Classifies on present fields rather than a tag: anything carrying
/// `result` or `error` is a response, anything else with a `method` is a
/// request when it has a non-null id and a notification otherwise.
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        let is_response = value.get("method").is_none()
            && (value.get("result").is_some() || value.get("error").is_some());

        if is_response {
            #[derive(Deserialize)]
            struct Response {
                #[serde(default)]
                id: Option<Id>,
                result: Option<Value>,
                error: Option<RpcError>,
            }

            let response: Response = serde_json::from_value(value).map_err(de::Error::custom)?;
            return Ok(Message::Response {
                id: response.id.unwrap_or(Id::Null),
                result: response.result,
                error: response.error,
            });
        }

        let Some(method) = value.get("method").and_then(Value::as_str).map(String::from) else {
            return Err(de::Error::custom("message has neither result nor method"));
        };
        let params = value.get("params").cloned().unwrap_or(Value::Null);

        match value.get("id") {
            None | Some(Value::Null) => Ok(Message::Notification { method, params }),
            Some(id) => Ok(Message::Request {
                id: serde_json::from_value(id.clone()).map_err(de::Error::custom)?,
                method,
                params,
            }),
        }
    }
}
