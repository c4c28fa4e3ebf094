use crate::ServiceResult;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Value of a `/<root>/CLI/<connectionId>` entry.
///
/// Both sides write into the same entry: the client writes a request, the
/// server replaces it with the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "State")]
pub enum Mailbox {
    Idle,
    Request {
        #[serde(rename = "Command")]
        command: String,
    },
    Response {
        #[serde(rename = "Ok")]
        ok: bool,
        #[serde(rename = "Output")]
        output: String,
    },
}

impl Mailbox {
    pub fn to_bytes(&self) -> ServiceResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_slice(data: &[u8]) -> ServiceResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
