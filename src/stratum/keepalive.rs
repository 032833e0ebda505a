use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepalivedParams {
    pub id: String,
}
