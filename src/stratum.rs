use super::*;

mod error;
mod job;
mod keepalive;
mod login;
mod message;
mod submit;

pub use {
    error::{RpcError, StratumError},
    job::JobParams,
    keepalive::KeepalivedParams,
    login::{LoginParams, LoginResult, StatusResult},
    message::{Id, Message},
    submit::{SubmitParams, nonce_from_hex, nonce_to_hex},
};

/// A request as the downstream server dispatches it.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerRequest {
    Login(LoginParams),
    GetJob,
    Submit(SubmitParams),
    Keepalived(KeepalivedParams),
}

/// Dispatches a parsed request line on its method name. Unknown methods and
/// malformed parameter shapes both surface the generic "invalid method"
/// error the wire expects.
pub fn parse_server_request(method: &str, params: Value) -> Result<ServerRequest, StratumError> {
    let result = match method {
        "login" => serde_json::from_value(params).map(ServerRequest::Login),
        "getjob" => Ok(ServerRequest::GetJob),
        "submit" => serde_json::from_value(params).map(ServerRequest::Submit),
        "keepalived" => serde_json::from_value(params).map(ServerRequest::Keepalived),
        _ => return Err(StratumError::InvalidMethod),
    };
    result.map_err(|_| StratumError::InvalidMethod)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_known_methods() {
        let login = parse_server_request(
            "login",
            json!({"login": "wallet", "pass": "x", "agent": "xmrig/2.6"}),
        )
        .unwrap();
        assert!(matches!(login, ServerRequest::Login(_)));

        assert_eq!(
            parse_server_request("getjob", json!({})).unwrap(),
            ServerRequest::GetJob
        );

        let keepalived =
            parse_server_request("keepalived", json!({"id": "abc"})).unwrap();
        assert_eq!(
            keepalived,
            ServerRequest::Keepalived(KeepalivedParams { id: "abc".into() })
        );
    }

    #[test]
    fn unknown_method_is_invalid() {
        assert_eq!(
            parse_server_request("mining.subscribe", json!({})),
            Err(StratumError::InvalidMethod)
        );
    }

    #[test]
    fn malformed_params_are_invalid() {
        assert_eq!(
            parse_server_request("submit", json!(["positional"])),
            Err(StratumError::InvalidMethod)
        );
    }
}
