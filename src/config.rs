//! Client configuration from environment variables with command-line overrides.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::{AppError, AppResult};

pub const DEFAULT_HOST: &str = "http://127.0.0.1:4943";
pub const DEFAULT_CANISTER_ID: &str = "aaaaa-aa";
pub const DEFAULT_IDENTITY_PROVIDER: &str = "https://identity.ic0.app/#authorize";

/// Which deployment the client talks to. Anything other than the public
/// network needs the replica root key fetched before responses are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Ic,
    Local,
}

impl Network {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("ic") { Network::Ic } else { Network::Local }
    }

    pub fn is_production(&self) -> bool { matches!(self, Network::Ic) }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: Url,
    pub canister_id: String,
    pub network: Network,
    pub identity_provider: Url,
    pub state_dir: PathBuf,
    pub gc_time: Duration,
    pub request_timeout: Duration,
    /// Talk to an in-process service instead of a replica.
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Url::parse(DEFAULT_HOST).expect("default host is a valid URL"),
            canister_id: DEFAULT_CANISTER_ID.to_string(),
            network: Network::Local,
            identity_provider: Url::parse(DEFAULT_IDENTITY_PROVIDER).expect("default identity provider is a valid URL"),
            state_dir: PathBuf::from(".academic-chain"),
            gc_time: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            offline: false,
        }
    }
}

fn parse_secs_env(name: &str) -> Option<u64> {
    match env::var(name) {
        Ok(val) => val.trim().parse::<u64>().ok(),
        Err(_) => None,
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_bool_env(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(v) => parse_bool(&v),
        Err(_) => None,
    }
}

/// Value following `flag` in `args`, if any.
pub fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_url(what: &str, s: &str) -> AppResult<Url> {
    Url::parse(s).map_err(|e| AppError::user("invalid_config".to_string(), format!("invalid {} '{}': {}", what, s, e)))
}

impl Config {
    /// Environment first, then flags. Unknown flags are ignored here.
    pub fn load(args: &[String]) -> AppResult<Self> {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("ACADEMIC_CHAIN_HOST") { cfg.host = parse_url("host", &v)?; }
        if let Ok(v) = env::var("ACADEMIC_CHAIN_CANISTER_ID") { cfg.canister_id = v; }
        if let Ok(v) = env::var("ACADEMIC_CHAIN_NETWORK") { cfg.network = Network::parse(&v); }
        if let Ok(v) = env::var("ACADEMIC_CHAIN_IDENTITY_PROVIDER") { cfg.identity_provider = parse_url("identity provider", &v)?; }
        if let Ok(v) = env::var("ACADEMIC_CHAIN_STATE_DIR") { cfg.state_dir = PathBuf::from(v); }
        if let Some(s) = parse_secs_env("ACADEMIC_CHAIN_GC_SECS") { cfg.gc_time = Duration::from_secs(s); }
        if let Some(s) = parse_secs_env("ACADEMIC_CHAIN_TIMEOUT_SECS") { cfg.request_timeout = Duration::from_secs(s); }
        if let Some(b) = parse_bool_env("ACADEMIC_CHAIN_OFFLINE") { cfg.offline = b; }

        if let Some(v) = arg_value(args, "--host") { cfg.host = parse_url("host", v)?; }
        if let Some(v) = arg_value(args, "--canister") { cfg.canister_id = v.to_string(); }
        if let Some(v) = arg_value(args, "--network") { cfg.network = Network::parse(v); }
        if let Some(v) = arg_value(args, "--identity-provider") { cfg.identity_provider = parse_url("identity provider", v)?; }
        if let Some(v) = arg_value(args, "--state-dir") { cfg.state_dir = PathBuf::from(v); }
        if has_flag(args, "--offline") { cfg.offline = true; }

        if cfg.canister_id.trim().is_empty() {
            return Err(AppError::user("invalid_config", "canister id must not be empty"));
        }
        Ok(cfg)
    }

    pub fn credential_path(&self) -> PathBuf { self.state_dir.join("credential.json") }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn network_parsing() {
        assert_eq!(Network::parse("ic"), Network::Ic);
        assert_eq!(Network::parse(" IC "), Network::Ic);
        assert_eq!(Network::parse("local"), Network::Local);
        assert_eq!(Network::parse(""), Network::Local);
        assert!(Network::Ic.is_production());
        assert!(!Network::Local.is_production());
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::load(&args(&["--host", "http://10.0.0.2:8000", "--network", "ic", "--canister", "rrkah-fqaaa-aaaaa-aaaaq-cai"])).unwrap();
        assert_eq!(cfg.host.as_str(), "http://10.0.0.2:8000/");
        assert_eq!(cfg.network, Network::Ic);
        assert_eq!(cfg.canister_id, "rrkah-fqaaa-aaaaa-aaaaq-cai");
    }

    #[test]
    fn bad_host_flag_is_user_error() {
        let err = Config::load(&args(&["--host", "not a url"])).unwrap_err();
        assert!(matches!(err, AppError::UserInput { .. }));
    }

    #[test]
    fn arg_helpers() {
        let a = args(&["--repl", "--host"]);
        assert!(has_flag(&a, "--repl"));
        assert_eq!(arg_value(&a, "--host"), None);
    }

    #[test]
    fn offline_flag_and_bool_parsing() {
        assert!(Config::load(&args(&["--offline"])).unwrap().offline);
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        std::env::set_var("ACADEMIC_CHAIN_CONFIG_TEST_BOOL", "1");
        assert_eq!(parse_bool_env("ACADEMIC_CHAIN_CONFIG_TEST_BOOL"), Some(true));
        assert_eq!(parse_bool_env("ACADEMIC_CHAIN_CONFIG_TEST_UNSET"), None);
    }

    #[test]
    fn credential_path_under_state_dir() {
        let cfg = Config { state_dir: PathBuf::from("/tmp/ac"), ..Config::default() };
        assert_eq!(cfg.credential_path(), PathBuf::from("/tmp/ac/credential.json"));
    }
}
