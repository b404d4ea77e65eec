// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use hyper::StatusCode;

/// Error is returned by every RPC handler. Each variant is scoped to the single call that produced
/// it and carries enough context to be shown to the caller as-is.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The server is misconfigured; not the caller's fault.
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("Unable to build request as the target URL {url} is blocked by the regexp {pattern}")]
    Policy { url: String, pattern: String },
    #[error("{0}")]
    Unimplemented(&'static str),
    #[error("Unable to marshal downstream request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Error decoding upstream response json: {0}")]
    Decode(String),
    #[error("Unable to reach {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Error reading upstream response body: {0}")]
    Read(String),
    #[error("Error closing upstream response: {0}")]
    Close(String),
    #[error("{remaining} errors left")]
    Intermittent { remaining: u32 },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Identity(String),
    #[error("{0}")]
    Internal(String),
}

/// Code is the RPC status carried alongside an error, using the well known gRPC numbering so
/// callers written against other infrabin implementations keep working.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Ok = 0,
    InvalidArgument = 3,
    NotFound = 5,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::InvalidArgument => "InvalidArgument",
            Code::NotFound => "NotFound",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl Error {
    /// kind is the machine readable name of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Validation(_) => "validation",
            Error::Policy { .. } => "policy",
            Error::Unimplemented(_) => "unimplemented",
            Error::Encode(_) => "encode",
            Error::Decode(_) => "decode",
            Error::Network { .. } => "network",
            Error::Read(_) => "read",
            Error::Close(_) => "close",
            Error::Intermittent { .. } => "intermittent",
            Error::NotFound(_) => "not_found",
            Error::Unavailable(_) => "unavailable",
            Error::Identity(_) => "identity",
            Error::Internal(_) => "internal",
        }
    }

    pub fn code(&self) -> Code {
        match self {
            Error::Validation(_) | Error::Policy { .. } => Code::InvalidArgument,
            Error::Unimplemented(_) => Code::Unimplemented,
            Error::Intermittent { .. } | Error::Unavailable(_) => Code::Unavailable,
            Error::NotFound(_) => Code::NotFound,
            Error::Config(_)
            | Error::Encode(_)
            | Error::Decode(_)
            | Error::Network { .. }
            | Error::Read(_)
            | Error::Close(_)
            | Error::Identity(_)
            | Error::Internal(_) => Code::Internal,
        }
    }
}

/// ErrorBody is the JSON shape errors are returned to callers in.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: i32,
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        ErrorBody {
            code: e.code() as i32,
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_message_names_url_and_pattern() {
        let e = Error::Policy {
            url: "https://blocked.example/x".to_string(),
            pattern: r"^https://allowed\.example".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("https://blocked.example/x"), "{msg}");
        assert!(msg.contains(r"^https://allowed\.example"), "{msg}");
        assert_eq!(e.code(), Code::InvalidArgument);
        assert_eq!(e.code().http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn intermittent_body() {
        let body = ErrorBody::from(&Error::Intermittent { remaining: 2 });
        assert_eq!(
            body,
            ErrorBody {
                code: 14,
                kind: "intermittent".to_string(),
                message: "2 errors left".to_string(),
            }
        );
    }

    #[test]
    fn server_side_failures_are_internal() {
        for e in [
            Error::Config("bad".to_string()),
            Error::Read("eof".to_string()),
            Error::Close("truncated".to_string()),
            Error::Network {
                url: "http://x".to_string(),
                reason: "refused".to_string(),
            },
        ] {
            assert_eq!(e.code(), Code::Internal, "{e:?}");
        }
        assert_eq!(
            Error::Unimplemented("off").code().http_status(),
            StatusCode::NOT_IMPLEMENTED
        );
    }
}
