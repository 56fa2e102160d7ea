//! Typed error surfaces for the engine's internal layers.
//!
//! Command handlers never propagate these directly to the wire: the
//! dispatcher converts them into Redis-style error reply strings at the
//! boundary (see `commands::dispatch`).

use thiserror::Error;

/// Errors from the wire codec (`protocol`).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid-framing: {0}")]
    InvalidFraming(String),
    #[error("connection closed")]
    Eof,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the append-only log and snapshot subsystems.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch on snapshot file")]
    ChecksumMismatch,
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("encryption error: {0}")]
    Crypto(String),
    #[error("replay stopped: unparsable residue at offset {0}")]
    ReplayTruncated(u64),
}

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot open config file {0}: {1}")]
    Open(String, std::io::Error),
    #[error("bad directive at line {line}: {message}")]
    BadDirective { line: usize, message: String },
}

/// A command-level failure that always has a Redis-style wire representation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR {0}")]
    Generic(String),
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR value is not a valid float")]
    NotAFloat,
    #[error("ERR syntax error")]
    Syntax,
    #[error("NOAUTH Authentication required")]
    NoAuth,
    #[error("WRONGPASS invalid username-password pair")]
    WrongPass,
    #[error("NOPERM this user has no permissions to run this command")]
    NoPerm,
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    MaxMemory,
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

impl CommandError {
    /// The exact bytes placed after the leading `-` in an error reply frame.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}
