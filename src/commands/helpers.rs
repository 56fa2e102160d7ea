//! Shared plumbing used by every command module: the handler type, argument
//! parsing, and the uniform handler protocol steps from spec.md §4.2.

use crate::client::Client;
use crate::error::CommandError;
use crate::state::AppState;
use bytes::Bytes;
use std::sync::Arc;

pub type Ctx = Arc<AppState>;
pub type Handler = fn(&Ctx, &mut Client, &[Bytes]) -> crate::protocol::Reply;

pub fn check_arity(name: &str, argc: usize, arity: i32) -> Result<(), CommandError> {
    let ok = if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= (-arity) as usize
    };
    if ok {
        Ok(())
    } else {
        Err(CommandError::WrongArity(name.to_ascii_lowercase()))
    }
}

pub fn parse_i64(b: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or(CommandError::NotAnInteger)
}

pub fn parse_f64(b: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f: &f64| !f.is_nan())
        .ok_or(CommandError::NotAFloat)
}

pub fn name_upper(args: &[Bytes]) -> String {
    String::from_utf8_lossy(&args[0]).to_ascii_uppercase()
}

/// Clamps a possibly-negative list/range index (counting from the end) to
/// `[0, len]`.
pub fn normalize_index(idx: i64, len: usize) -> i64 {
    if idx < 0 {
        (len as i64 + idx).max(0)
    } else {
        idx
    }
}
