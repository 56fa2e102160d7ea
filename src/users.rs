//! User authentication and the admin/non-admin permission gate (spec.md
//! §4.3, §6). Persisted as `passwd.bin` in the data directory.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub password_hash: [u8; 32],
    pub admin: bool,
}

impl User {
    pub fn new(name: impl Into<String>, password: &str, admin: bool) -> Self {
        User {
            name: name.into(),
            password_hash: hash_password(password),
            admin,
        }
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        self.password_hash == hash_password(candidate)
    }
}

pub fn hash_password(password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Guards the user map with a dedicated RW latch (spec.md §5).
pub struct UserStore {
    inner: RwLock<HashMap<String, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        UserStore {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, user: User) {
        self.inner.write().unwrap().insert(user.name.clone(), user);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner.write().unwrap().remove(name).is_some()
    }

    pub fn authenticate(&self, name: &str, password: &str) -> Option<bool> {
        self.inner
            .read()
            .unwrap()
            .get(name)
            .map(|u| u.check_password(password))
    }

    pub fn is_admin(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .get(name)
            .map(|u| u.admin)
            .unwrap_or(false)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.read().unwrap().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let guard = self.inner.read().unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(guard.len() as u32).to_le_bytes());
        for user in guard.values() {
            buf.extend_from_slice(&(user.name.len() as u32).to_le_bytes());
            buf.extend_from_slice(user.name.as_bytes());
            buf.extend_from_slice(&user.password_hash);
            buf.push(user.admin as u8);
        }
        buf
    }

    pub fn load_from(&self, buf: &[u8]) -> Option<()> {
        let mut pos = 0usize;
        let read_u32 = |buf: &[u8], pos: &mut usize| -> Option<u32> {
            let b: [u8; 4] = buf.get(*pos..*pos + 4)?.try_into().ok()?;
            *pos += 4;
            Some(u32::from_le_bytes(b))
        };
        let count = read_u32(buf, &mut pos)?;
        let mut map = HashMap::new();
        for _ in 0..count {
            let name_len = read_u32(buf, &mut pos)? as usize;
            let name = String::from_utf8(buf.get(pos..pos + name_len)?.to_vec()).ok()?;
            pos += name_len;
            let hash: [u8; 32] = buf.get(pos..pos + 32)?.try_into().ok()?;
            pos += 32;
            let admin = *buf.get(pos)? != 0;
            pos += 1;
            map.insert(
                name.clone(),
                User {
                    name,
                    password_hash: hash,
                    admin,
                },
            );
        }
        *self.inner.write().unwrap() = map;
        Some(())
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands reachable without authentication (spec.md §4.3's safe list).
pub const SAFE_COMMANDS: &[&str] = &["COMMAND", "COMMANDS", "PING", "HELP", "AUTH", "PASSWD", "WHOAMI"];

/// Commands requiring the admin attribute (spec.md §4.3's admin-only set).
pub const ADMIN_COMMANDS: &[&str] = &[
    "FLUSHDB",
    "FLUSHALL",
    "USERADD",
    "USERDEL",
    "USERS",
    "BGSAVE",
    "SAVE",
    "BGREWRITEAOF",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_check_roundtrip() {
        let u = User::new("alice", "hunter2", false);
        assert!(u.check_password("hunter2"));
        assert!(!u.check_password("wrong"));
    }

    #[test]
    fn serialize_roundtrip() {
        let store = UserStore::new();
        store.add(User::new("alice", "pw1", true));
        store.add(User::new("bob", "pw2", false));
        let buf = store.serialize();
        let restored = UserStore::new();
        restored.load_from(&buf).unwrap();
        assert!(restored.authenticate("alice", "pw1").unwrap());
        assert!(restored.is_admin("alice"));
        assert!(!restored.is_admin("bob"));
    }
}
