//! 💀 Error taxonomy for everything that talks to the remote index.
//!
//! 🎬 *[a 412 walks into a bar. the bartender says "you again?". the 412 says "I already exist".]*
//!
//! Five flavors of sadness, one enum:
//! - `Validation`: we caught it before any bytes left the building
//! - `Connectivity`: no response at all (DNS, TCP, TLS). Carries 503 by convention
//! - `Rejected`: the remote answered with a 4xx and meant it
//! - `Remote`: any other non-2xx (5xx, 3xx the transport refused to follow, etc.)
//! - `Unreachable`: every host we tried failed, each host's own error kept inside
//!
//! `Decode` is the bonus track: a 2xx that swore it was JSON and lied.
//!
//! Search swallows these (fail-open). Push and schema management let them fly. 🦆

use thiserror::Error;

/// 📡 Status carried by connectivity failures, where there is no real response to read one from.
pub const CONNECTIVITY_STATUS: u16 = 503;

/// 🔒 "Already exists" as far as field provisioning is concerned.
pub const ALREADY_EXISTS_STATUS: u16 = 412;

/// 💀 Everything that can go sideways between us and the remote search service.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// 🚫 Bad input caught before any network call. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// 📡 No response at all. The network ghosted us.
    #[error("connectivity failure ({status}): {message}")]
    Connectivity { status: u16, message: String },

    /// 🙅 The remote looked at our request and said 4xx.
    #[error("remote rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// 🔥 Non-2xx, non-4xx. Usually a 5xx with a story to tell.
    #[error("{status}: {message}")]
    Remote { status: u16, message: String },

    /// 🕳️ Every attempted host failed. One `(host, error)` per attempt, in order.
    #[error("Host unreachable: {}", roll_call(.attempts))]
    Unreachable { attempts: Vec<(String, RemoteError)> },

    /// 🧩 A successful response whose body would not parse.
    #[error("could not decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// 🏗️ Shorthand for the fail-fast flavor.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 📡 Shorthand for "the wire is down", always stamped with 503.
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity {
            status: CONNECTIVITY_STATUS,
            message: msg.into(),
        }
    }

    /// 🔢 The status this failure carries, if it carries one at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Connectivity { status, .. }
            | Self::Rejected { status, .. }
            | Self::Remote { status, .. } => Some(*status),
            // 🔎 the last host tried speaks for the group
            Self::Unreachable { attempts } => attempts.last().and_then(|(_, err)| err.status()),
            Self::Validation(_) | Self::Decode(_) => None,
        }
    }

    /// ✅ True when the remote told us the thing already exists (field provisioning no-op).
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Rejected { status, .. } if *status == ALREADY_EXISTS_STATUS)
    }

    /// 🔄 True for failures where trying the same request again could plausibly work.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connectivity { .. } => true,
            Self::Unreachable { attempts } => attempts.iter().any(|(_, err)| err.is_transient()),
            _ => false,
        }
    }
}

/// 📋 `host: error,host: error`
fn roll_call(attempts: &[(String, RemoteError)]) -> String {
    attempts
        .iter()
        .map(|(host, err)| format!("{host}: {err}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_connectivity_always_wears_a_503_badge() {
        let the_ghosting = RemoteError::connectivity("dns error: no such host");
        assert_eq!(the_ghosting.status(), Some(503));
        assert!(the_ghosting.is_transient());
        assert!(!the_ghosting.is_already_exists());
    }

    #[test]
    fn the_one_where_412_means_we_were_already_friends() {
        let the_deja_vu = RemoteError::Rejected {
            status: 412,
            message: "Field already exists".to_string(),
        };
        assert!(the_deja_vu.is_already_exists());

        let the_real_no = RemoteError::Rejected {
            status: 403,
            message: "nope".to_string(),
        };
        assert!(!the_real_no.is_already_exists());
        assert_eq!(the_real_no.status(), Some(403));
    }

    #[test]
    fn the_one_where_unreachable_lists_every_host_that_let_us_down() {
        let the_roll_call = RemoteError::Unreachable {
            attempts: vec![
                (
                    "push.example.com".to_string(),
                    RemoteError::Remote { status: 502, message: "bad gateway".to_string() },
                ),
                ("backup.example.com".to_string(), RemoteError::connectivity("connection refused")),
            ],
        };
        assert_eq!(
            the_roll_call.to_string(),
            "Host unreachable: push.example.com: 502: bad gateway,\
             backup.example.com: connectivity failure (503): connection refused"
        );
        assert_eq!(the_roll_call.status(), Some(503));
        assert!(the_roll_call.is_transient());
    }

    #[test]
    fn the_one_where_a_lone_503_still_reads_as_a_503() {
        let the_lonely_host = RemoteError::Unreachable {
            attempts: vec![("push.example.com".to_string(), RemoteError::connectivity("dns error"))],
        };
        assert_eq!(the_lonely_host.status(), Some(503));
        assert!(the_lonely_host.is_transient());

        let the_server_fire = RemoteError::Unreachable {
            attempts: vec![(
                "push.example.com".to_string(),
                RemoteError::Remote { status: 500, message: "on fire".to_string() },
            )],
        };
        assert_eq!(the_server_fire.status(), Some(500));
        assert!(!the_server_fire.is_transient());
    }
}
