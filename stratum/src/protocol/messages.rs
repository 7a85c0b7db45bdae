use serde::{Deserialize, Serialize};

/// Wire result codes. The numeric values are part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    SolutionAccepted,
    SolutionRejected,
    LoginFailed,
    BadProtocol,
}

impl ResultCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ResultCode::SolutionAccepted => 0,
            ResultCode::SolutionRejected => 1,
            ResultCode::LoginFailed => 2,
            ResultCode::BadProtocol => 3,
        }
    }

    pub fn from_i32(code: i32) -> Option<ResultCode> {
        match code {
            0 => Some(ResultCode::SolutionAccepted),
            1 => Some(ResultCode::SolutionRejected),
            2 => Some(ResultCode::LoginFailed),
            3 => Some(ResultCode::BadProtocol),
            _ => None,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ResultCode::SolutionAccepted => "accepted",
            ResultCode::SolutionRejected => "rejected",
            ResultCode::LoginFailed => "login failed",
            ResultCode::BadProtocol => "bad protocol",
        }
    }
}

/// The stratum message family. One JSON object per line, dispatched on
/// the `method` field; `id` is the request id echoed in replies (for
/// `job` it carries the job id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Message {
    Login {
        id: String,
        api_key: String,
    },
    Job {
        id: String,
        input: String,
        pow: String,
        height: u64,
    },
    Solution {
        id: String,
        nonce: String,
        output: String,
    },
    Result {
        id: String,
        code: i32,
    },
    SolutionResult {
        id: String,
        code: i32,
        block_hash: String,
        height: u64,
    },
    Cancel {
        id: String,
    },
}

impl Message {
    pub fn method(&self) -> &'static str {
        match self {
            Message::Login { .. } => "login",
            Message::Job { .. } => "job",
            Message::Solution { .. } => "solution",
            Message::Result { .. } => "result",
            Message::SolutionResult { .. } => "solution_result",
            Message::Cancel { .. } => "cancel",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::Login { id, .. }
            | Message::Job { id, .. }
            | Message::Solution { id, .. }
            | Message::Result { id, .. }
            | Message::SolutionResult { id, .. }
            | Message::Cancel { id, .. } => id,
        }
    }

    pub fn result(id: impl Into<String>, code: ResultCode) -> Message {
        Message::Result {
            id: id.into(),
            code: code.as_i32(),
        }
    }
}
