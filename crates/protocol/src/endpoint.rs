//! Endpoint paths.
//!
//! The daemon exposes three WebSocket endpoint families, each addressed by
//! an optional context segment:
//!
//! ```text
//! /socket/term[/<context>][/ro]               command endpoint, binary output
//! /socket/text[/<context>][/ro]               command endpoint, text output
//! /socket/process-status-updates[/<context>]  status endpoint
//! ```
//!
//! A trailing `ro` segment selects the read-only variant of the command
//! endpoint. Because of that, a context literally named `ro` is only
//! reachable through its read-only variant.

use crate::error::{ProtocolError, Result};
use crate::messages::ResponseMode;

/// Path of the binary command endpoint.
pub const TERM_PATH: &str = "/socket/term";

/// Path of the text command endpoint.
pub const TEXT_PATH: &str = "/socket/text";

/// Path of the status endpoint.
pub const STATUS_PATH: &str = "/socket/process-status-updates";

/// Suffix selecting the read-only command variant.
pub const READ_ONLY_SUFFIX: &str = "ro";

/// A resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Command endpoint: driver or read-only observer.
    Command {
        /// Session context.
        context: String,
        /// Output frame representation.
        mode: ResponseMode,
        /// Always attach as observer.
        read_only: bool,
    },
    /// Status listener endpoint.
    Status {
        /// Session context.
        context: String,
    },
}

impl Endpoint {
    /// Parses a request path into an endpoint.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidEndpoint(path.to_string());

        let (base, rest) = [STATUS_PATH, TERM_PATH, TEXT_PATH]
            .iter()
            .find_map(|base| path.strip_prefix(base).map(|rest| (*base, rest)))
            .ok_or_else(invalid)?;

        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(invalid());
        }

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        if base == STATUS_PATH {
            return match segments.as_slice() {
                [] => Ok(Endpoint::Status {
                    context: String::new(),
                }),
                [context] => Ok(Endpoint::Status {
                    context: (*context).to_string(),
                }),
                _ => Err(invalid()),
            };
        }

        let mode = if base == TEXT_PATH {
            ResponseMode::Text
        } else {
            ResponseMode::Binary
        };

        let (context, read_only) = match segments.as_slice() {
            [] => (String::new(), false),
            [single] if *single == READ_ONLY_SUFFIX => (String::new(), true),
            [context] => ((*context).to_string(), false),
            [context, suffix] if *suffix == READ_ONLY_SUFFIX => ((*context).to_string(), true),
            _ => return Err(invalid()),
        };

        Ok(Endpoint::Command {
            context,
            mode,
            read_only,
        })
    }

    /// Builds the request path for this endpoint.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Command {
                context,
                mode,
                read_only,
            } => {
                let mut path = match mode {
                    ResponseMode::Text => TEXT_PATH.to_string(),
                    ResponseMode::Binary => TERM_PATH.to_string(),
                };
                if !context.is_empty() {
                    path.push('/');
                    path.push_str(context);
                }
                if *read_only {
                    path.push('/');
                    path.push_str(READ_ONLY_SUFFIX);
                }
                path
            }
            Endpoint::Status { context } => {
                if context.is_empty() {
                    STATUS_PATH.to_string()
                } else {
                    format!("{}/{}", STATUS_PATH, context)
                }
            }
        }
    }

    /// Returns the session context addressed by this endpoint.
    pub fn context(&self) -> &str {
        match self {
            Endpoint::Command { context, .. } | Endpoint::Status { context } => context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_command() {
        let endpoint = Endpoint::parse("/socket/term/build-42").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Command {
                context: "build-42".to_string(),
                mode: ResponseMode::Binary,
                read_only: false,
            }
        );
    }

    #[test]
    fn test_parse_text_read_only() {
        let endpoint = Endpoint::parse("/socket/text/c1/ro").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Command {
                context: "c1".to_string(),
                mode: ResponseMode::Text,
                read_only: true,
            }
        );
    }

    #[test]
    fn test_parse_empty_context() {
        assert_eq!(Endpoint::parse("/socket/term").unwrap().context(), "");
        assert_eq!(Endpoint::parse("/socket/term/").unwrap().context(), "");

        let read_only = Endpoint::parse("/socket/term/ro").unwrap();
        assert!(matches!(
            read_only,
            Endpoint::Command { read_only: true, .. }
        ));
        assert_eq!(read_only.context(), "");
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            Endpoint::parse("/socket/process-status-updates/c1").unwrap(),
            Endpoint::Status {
                context: "c1".to_string()
            }
        );
        assert_eq!(
            Endpoint::parse("/socket/process-status-updates").unwrap(),
            Endpoint::Status {
                context: String::new()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_paths() {
        assert!(Endpoint::parse("/").is_err());
        assert!(Endpoint::parse("/socket/terminal/c1").is_err());
        assert!(Endpoint::parse("/socket/term/a/b").is_err());
        assert!(Endpoint::parse("/socket/process-status-updates/a/ro").is_err());
    }

    #[test]
    fn test_path_matches_parse() {
        let endpoints = [
            Endpoint::Command {
                context: "c1".to_string(),
                mode: ResponseMode::Binary,
                read_only: true,
            },
            Endpoint::Command {
                context: String::new(),
                mode: ResponseMode::Text,
                read_only: false,
            },
            Endpoint::Status {
                context: "c2".to_string(),
            },
        ];

        for endpoint in endpoints {
            assert_eq!(Endpoint::parse(&endpoint.path()).unwrap(), endpoint);
        }
    }
}
