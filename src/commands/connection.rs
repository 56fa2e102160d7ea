//! Connection-management commands (spec.md §4.1): liveness, auth handshake,
//! and introspection of the command table.

use super::helpers::Ctx;
use crate::client::Client;
use crate::error::CommandError;
use crate::protocol::Reply;
use bytes::Bytes;

pub fn ping(_ctx: &Ctx, _client: &mut Client, args: &[Bytes]) -> Reply {
    match args.len() {
        1 => Reply::Simple("PONG".into()),
        2 => Reply::bulk(args[1].clone()),
        _ => CommandError::WrongArity("PING".into()).into(),
    }
}

pub fn echo(_ctx: &Ctx, _client: &mut Client, args: &[Bytes]) -> Reply {
    Reply::bulk(args[1].clone())
}

pub fn auth(ctx: &Ctx, client: &mut Client, args: &[Bytes]) -> Reply {
    let (username, password) = match args.len() {
        2 => ("admin".to_string(), String::from_utf8_lossy(&args[1]).to_string()),
        3 => (
            String::from_utf8_lossy(&args[1]).to_string(),
            String::from_utf8_lossy(&args[2]).to_string(),
        ),
        _ => return CommandError::WrongArity("AUTH".into()).into(),
    };
    match ctx.users.authenticate(&username, &password) {
        Some(true) => {
            client.authenticated = true;
            client.username = Some(username.clone());
            client.is_admin = ctx.users.is_admin(&username);
            Reply::ok()
        }
        Some(false) => CommandError::WrongPass.into(),
        None => CommandError::WrongPass.into(),
    }
}

pub fn whoami(_ctx: &Ctx, client: &mut Client, _args: &[Bytes]) -> Reply {
    match &client.username {
        Some(name) => Reply::bulk(name.clone()),
        None => Reply::bulk("default"),
    }
}

pub fn command(_ctx: &Ctx, _client: &mut Client, _args: &[Bytes]) -> Reply {
    Reply::array(super::command_names().into_iter().map(Reply::bulk).collect())
}

pub fn quit(_ctx: &Ctx, _client: &mut Client, _args: &[Bytes]) -> Reply {
    Reply::ok()
}
