//! Minimal line-oriented configuration loader (spec.md §6). The parser
//! itself is explicitly out of scope as a sophisticated external
//! collaborator (spec.md §1); this is the smallest reader that can
//! populate every option in spec.md §6's table, adapted from the teacher's
//! `redis/config.rs` directive loop.

use crate::error::ConfigError;
use crate::eviction::EvictionPolicy;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AofFsync {
    Always,
    EverySec,
    No,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub tls_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub bind: Vec<IpAddr>,
    pub databases: usize,
    pub aof_enabled: bool,
    pub aof_fsync: AofFsync,
    pub rdb_triggers: Vec<(u64, u64)>,
    pub maxmemory: usize,
    pub eviction: EvictionPolicy,
    pub maxmemory_samples: usize,
    pub requirepass: bool,
    pub admin_password: String,
    pub encrypt: bool,
    pub nonce: String,
    pub sensitive: bool,
    pub dir: PathBuf,
    pub aof_fn: String,
    pub rdb_fn: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 7379,
            tls_port: Some(7380),
            tls_cert: None,
            tls_key: None,
            bind: Vec::new(),
            databases: 16,
            aof_enabled: false,
            aof_fsync: AofFsync::EverySec,
            rdb_triggers: vec![(900, 1), (300, 10), (60, 10000)],
            maxmemory: 0,
            eviction: EvictionPolicy::NoEviction,
            maxmemory_samples: 5,
            requirepass: false,
            admin_password: "admin".into(),
            encrypt: false,
            nonce: "redberry-default-nonce".into(),
            sensitive: false,
            dir: PathBuf::from("."),
            aof_fn: "appendonly".into(),
            rdb_fn: "dump".into(),
        }
    }
}

impl Config {
    pub fn aof_path(&self, db: usize) -> PathBuf {
        self.dir.join(format!("{}{}.aof", self.aof_fn, db))
    }

    pub fn rdb_path(&self, db: usize) -> PathBuf {
        self.dir.join(format!("{}{}.rdb", self.rdb_fn, db))
    }

    pub fn passwd_path(&self) -> PathBuf {
        self.dir.join("passwd.bin")
    }

    /// Loads directives from `filename`, one per line, `directive arg...`.
    /// Unknown directives and malformed lines are reported as
    /// `ConfigError::BadDirective`; comments (`#`) and blank lines are
    /// skipped.
    pub fn load_file(&mut self, filename: &str) -> Result<(), ConfigError> {
        let file = File::open(filename).map_err(|e| ConfigError::Open(filename.to_string(), e))?;
        let reader = BufReader::new(file);
        for (idx, line) in reader.lines().enumerate() {
            let line_num = idx + 1;
            let line = line.map_err(|e| ConfigError::Open(filename.to_string(), e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let argv: Vec<&str> = trimmed.split_whitespace().collect();
            self.apply_directive(&argv, line_num)?;
        }
        Ok(())
    }

    fn apply_directive(&mut self, argv: &[&str], line: usize) -> Result<(), ConfigError> {
        let bad = |message: &str| {
            Err(ConfigError::BadDirective {
                line,
                message: message.to_string(),
            })
        };
        match argv.first().map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("port") if argv.len() == 2 => {
                self.port = argv[1].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "port must be numeric".into(),
                })?;
            }
            Some("tls_port") if argv.len() == 2 => {
                self.tls_port = Some(argv[1].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "tls_port must be numeric".into(),
                })?);
            }
            Some("tls_cert") if argv.len() == 2 => self.tls_cert = Some(PathBuf::from(argv[1])),
            Some("tls_key") if argv.len() == 2 => self.tls_key = Some(PathBuf::from(argv[1])),
            Some("bind") => {
                self.bind = argv[1..]
                    .iter()
                    .filter_map(|a| a.parse().ok())
                    .collect();
            }
            Some("databases") if argv.len() == 2 => {
                self.databases = argv[1].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "databases must be a positive integer".into(),
                })?;
            }
            Some("aof_enabled") if argv.len() == 2 => self.aof_enabled = yes_no(argv[1]),
            Some("aof_fsync") if argv.len() == 2 => {
                self.aof_fsync = match argv[1] {
                    "always" => AofFsync::Always,
                    "everysec" => AofFsync::EverySec,
                    "no" => AofFsync::No,
                    _ => return bad("aof_fsync must be always|everysec|no"),
                };
            }
            Some("rdb") if argv.len() == 3 => {
                let secs = argv[1].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "rdb interval must be numeric".into(),
                })?;
                let changes = argv[2].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "rdb change threshold must be numeric".into(),
                })?;
                self.rdb_triggers.push((secs, changes));
            }
            Some("maxmemory") if argv.len() == 2 => {
                self.maxmemory = argv[1].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "maxmemory must be numeric".into(),
                })?;
            }
            Some("eviction") if argv.len() == 2 => {
                self.eviction = EvictionPolicy::parse(argv[1])
                    .ok_or(())
                    .map_err(|_| ConfigError::BadDirective {
                        line,
                        message: "unknown eviction policy".into(),
                    })?;
            }
            Some("maxmemory_samples") if argv.len() == 2 => {
                self.maxmemory_samples = argv[1].parse().map_err(|_| ConfigError::BadDirective {
                    line,
                    message: "maxmemory_samples must be numeric".into(),
                })?;
            }
            Some("requirepass") if argv.len() == 2 => self.requirepass = yes_no(argv[1]),
            Some("admin_password") if argv.len() == 2 => self.admin_password = argv[1].to_string(),
            Some("encrypt") if argv.len() == 2 => self.encrypt = yes_no(argv[1]),
            Some("nonce") if argv.len() == 2 => self.nonce = argv[1].to_string(),
            Some("sensitive") if argv.len() == 2 => self.sensitive = yes_no(argv[1]),
            Some("dir") if argv.len() == 2 => self.dir = PathBuf::from(argv[1]),
            Some("aof_fn") if argv.len() == 2 => self.aof_fn = argv[1].to_string(),
            Some("rdb_fn") if argv.len() == 2 => self.rdb_fn = argv[1].to_string(),
            _ => return bad("unknown or malformed directive"),
        }
        Ok(())
    }
}

fn yes_no(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_recognized_directives() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "port 7000").unwrap();
        writeln!(file, "maxmemory 1048576").unwrap();
        writeln!(file, "eviction allkeys-lru").unwrap();
        writeln!(file, "requirepass yes").unwrap();
        let mut cfg = Config::default();
        cfg.load_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.maxmemory, 1048576);
        assert_eq!(cfg.eviction, EvictionPolicy::AllKeysLru);
        assert!(cfg.requirepass);
    }

    #[test]
    fn rejects_bad_directive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port notanumber").unwrap();
        let mut cfg = Config::default();
        assert!(cfg.load_file(file.path().to_str().unwrap()).is_err());
    }
}
