use super::*;

/// The share and session rejection reasons with their wire spellings.
///
/// The display strings are protocol, not prose: the upstream side parses the
/// exact text back into a status, so they must never change.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum StratumError {
    #[snafu(display("Unauthenticated"))]
    Unauthenticated,
    #[snafu(display("IP Address currently banned"))]
    IpBanned,
    #[snafu(display("Duplicate share"))]
    Duplicate,
    #[snafu(display("Block expired"))]
    Expired,
    #[snafu(display("Invalid job id"))]
    InvalidJobId,
    #[snafu(display("Low difficulty share"))]
    LowDifficulty,
    #[snafu(display("invalid method"))]
    InvalidMethod,
    #[snafu(display("missing login"))]
    MissingLogin,
    #[snafu(display("invalid address used for login"))]
    InvalidAddress,
    #[snafu(display("No job available"))]
    NoJobAvailable,
}

impl StratumError {
    const ALL: [Self; 10] = [
        Self::Unauthenticated,
        Self::IpBanned,
        Self::Duplicate,
        Self::Expired,
        Self::InvalidJobId,
        Self::LowDifficulty,
        Self::InvalidMethod,
        Self::MissingLogin,
        Self::InvalidAddress,
        Self::NoJobAvailable,
    ];

    /// Maps a received error message back onto the taxonomy.
    pub fn from_message(message: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|error| error.to_string() == message)
    }

    pub fn code(self) -> i32 {
        -1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl From<StratumError> for RpcError {
    fn from(error: StratumError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_spellings_are_stable() {
        assert_eq!(StratumError::Unauthenticated.to_string(), "Unauthenticated");
        assert_eq!(
            StratumError::IpBanned.to_string(),
            "IP Address currently banned"
        );
        assert_eq!(StratumError::Duplicate.to_string(), "Duplicate share");
        assert_eq!(StratumError::Expired.to_string(), "Block expired");
        assert_eq!(StratumError::InvalidJobId.to_string(), "Invalid job id");
        assert_eq!(
            StratumError::LowDifficulty.to_string(),
            "Low difficulty share"
        );
    }

    #[test]
    fn every_spelling_parses_back() {
        for error in StratumError::ALL {
            assert_eq!(StratumError::from_message(&error.to_string()), Some(error));
        }
        assert_eq!(StratumError::from_message("something else"), None);
    }

    #[test]
    fn rpc_error_shape() {
        let error = RpcError::from(StratumError::InvalidJobId);
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"code": -1, "message": "Invalid job id"})
        );
    }
}
