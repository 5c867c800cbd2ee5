use anyhow::{Context, Result};
use clap::Parser;
use std::{collections::BTreeSet, env, fmt, path::PathBuf, str::FromStr};

const GIB: u64 = 1024 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root of the blob fan-out tree.
    pub data_root: PathBuf,
    /// Uploads are refused and readiness degrades below this much free space.
    pub min_free_gb: u64,
    /// Answer 404 when deleting an id that does not exist.
    pub delete_strict_404: bool,
    /// Largest accepted upload in bytes; 0 disables the limit.
    pub max_file_bytes: u64,
    pub api_keys: ApiKeys,
    pub log_json: bool,
}

/// API keys per capability. An empty set turns auth off for that capability.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    pub upload: BTreeSet<String>,
    pub read: BTreeSet<String>,
    pub delete: BTreeSet<String>,
}

/// Prints key counts only; the keys themselves never reach the logs.
impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys")
            .field("upload", &self.upload.len())
            .field("read", &self.read.len())
            .field("delete", &self.delete.len())
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Content-addressed blob storage API")]
pub struct Args {
    /// Host to bind to (overrides DATA_BANK_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DATA_BANK_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides DATA_ROOT)
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Minimum free space in GiB (overrides MIN_FREE_GB)
    #[arg(long)]
    pub min_free_gb: Option<u64>,

    /// Maximum upload size in bytes, 0 for unlimited (overrides MAX_FILE_BYTES)
    #[arg(long)]
    pub max_file_bytes: Option<u64>,

    /// Return 404 when deleting a missing file (or set DELETE_STRICT_404)
    #[arg(long)]
    pub delete_strict_404: bool,

    /// Emit logs as JSON lines (or set DATA_BANK_LOG_JSON)
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge CLI args over values from `lookup`.
    ///
    /// Blank values count as unset. Read and delete keys fall back to the
    /// upload keys when unset or empty.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let env_host = var("DATA_BANK_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_number(var("DATA_BANK_PORT"), "DATA_BANK_PORT", 8080)?;
        let env_root = var("DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/data/files"));
        let env_min_free = parse_number(var("MIN_FREE_GB"), "MIN_FREE_GB", 1)?;
        let env_max_bytes = parse_number(var("MAX_FILE_BYTES"), "MAX_FILE_BYTES", 0)?;
        let env_strict = var("DELETE_STRICT_404").is_some_and(|v| is_truthy(&v));
        let env_log_json = var("DATA_BANK_LOG_JSON").is_some_and(|v| is_truthy(&v));

        let upload = parse_keys(var("API_UPLOAD_KEYS").as_deref());
        let read = parse_keys(var("API_READ_KEYS").as_deref());
        let delete = parse_keys(var("API_DELETE_KEYS").as_deref());
        let api_keys = ApiKeys {
            read: if read.is_empty() { upload.clone() } else { read },
            delete: if delete.is_empty() {
                upload.clone()
            } else {
                delete
            },
            upload,
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_root: args.data_root.unwrap_or(env_root),
            min_free_gb: args.min_free_gb.unwrap_or(env_min_free),
            delete_strict_404: args.delete_strict_404 || env_strict,
            max_file_bytes: args.max_file_bytes.unwrap_or(env_max_bytes),
            api_keys,
            log_json: args.log_json || env_log_json,
        })
    }

    /// Defaults rooted at `data_root`, with no free-space floor and auth off.
    pub fn for_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            data_root: data_root.into(),
            min_free_gb: 0,
            delete_strict_404: false,
            max_file_bytes: 0,
            api_keys: ApiKeys::default(),
            log_json: false,
        }
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_gb.saturating_mul(GIB)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Comma-separated keys, trimmed, blanks dropped, duplicates collapsed.
fn parse_keys(value: Option<&str>) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(Args::default(), |key| vars.get(key).cloned())
    }

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = resolve(&[]).unwrap();
        assert_eq!(cfg.data_root, PathBuf::from("/data/files"));
        assert_eq!(cfg.min_free_gb, 1);
        assert!(!cfg.delete_strict_404);
        assert_eq!(cfg.max_file_bytes, 0);
        assert_eq!(cfg.api_keys, ApiKeys::default());
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = resolve(&[
            ("DATA_ROOT", "  "),
            ("MIN_FREE_GB", "  "),
            ("DELETE_STRICT_404", "  "),
            ("MAX_FILE_BYTES", " "),
        ])
        .unwrap();
        assert_eq!(cfg.data_root, PathBuf::from("/data/files"));
        assert_eq!(cfg.min_free_gb, 1);
        assert!(!cfg.delete_strict_404);
        assert_eq!(cfg.max_file_bytes, 0);
    }

    #[test]
    fn strict_delete_flag_variants() {
        for value in ["1", "true", "TRUE", "TrUe", "yes", "YeS"] {
            assert!(resolve(&[("DELETE_STRICT_404", value)]).unwrap().delete_strict_404);
        }
        for value in ["0", "false", "FALSE", "no", "nO", "maybe"] {
            assert!(!resolve(&[("DELETE_STRICT_404", value)]).unwrap().delete_strict_404);
        }
    }

    #[test]
    fn keys_are_trimmed_and_deduplicated() {
        let cfg = resolve(&[("API_UPLOAD_KEYS", " a , a , b ,  c ,")]).unwrap();
        assert_eq!(cfg.api_keys.upload, keys(&["a", "b", "c"]));
    }

    #[test]
    fn read_and_delete_inherit_upload_keys() {
        let cfg = resolve(&[("API_UPLOAD_KEYS", "u1,u2")]).unwrap();
        assert_eq!(cfg.api_keys.read, keys(&["u1", "u2"]));
        assert_eq!(cfg.api_keys.delete, keys(&["u1", "u2"]));

        let cfg = resolve(&[
            ("API_UPLOAD_KEYS", "u1,u2"),
            ("API_READ_KEYS", "r1, r2"),
            ("API_DELETE_KEYS", "d1"),
        ])
        .unwrap();
        assert_eq!(cfg.api_keys.upload, keys(&["u1", "u2"]));
        assert_eq!(cfg.api_keys.read, keys(&["r1", "r2"]));
        assert_eq!(cfg.api_keys.delete, keys(&["d1"]));
    }

    #[test]
    fn explicitly_empty_keys_still_inherit() {
        let cfg = resolve(&[
            ("API_UPLOAD_KEYS", "u1"),
            ("API_READ_KEYS", ""),
            ("API_DELETE_KEYS", " , "),
        ])
        .unwrap();
        assert_eq!(cfg.api_keys.read, keys(&["u1"]));
        assert_eq!(cfg.api_keys.delete, keys(&["u1"]));
    }

    #[test]
    fn numeric_boundaries() {
        let cfg = resolve(&[("MIN_FREE_GB", "0"), ("MAX_FILE_BYTES", "2147483648")]).unwrap();
        assert_eq!(cfg.min_free_gb, 0);
        assert_eq!(cfg.min_free_bytes(), 0);
        assert_eq!(cfg.max_file_bytes, 1 << 31);
    }

    #[test]
    fn invalid_numbers_are_errors() {
        assert!(resolve(&[("MIN_FREE_GB", "abc")]).is_err());
        assert!(resolve(&[("MAX_FILE_BYTES", "not-a-number")]).is_err());
        assert!(resolve(&[("DATA_BANK_PORT", "99999")]).is_err());
    }

    #[test]
    fn debug_output_hides_api_keys() {
        let cfg = resolve(&[
            ("API_UPLOAD_KEYS", "s3cr3t-upload,other-upload"),
            ("API_READ_KEYS", "s3cr3t-read"),
        ])
        .unwrap();
        let rendered = format!("{:?}", cfg);
        for key in ["s3cr3t-upload", "other-upload", "s3cr3t-read"] {
            assert!(!rendered.contains(key), "{rendered}");
        }
        assert!(rendered.contains("upload: 2"));
        assert!(rendered.contains("read: 1"));
        assert!(rendered.contains("delete: 2"));
    }

    #[test]
    fn cli_args_override_env() {
        let args = Args {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            data_root: Some(PathBuf::from("/tmp/blobs")),
            min_free_gb: Some(5),
            max_file_bytes: Some(10),
            delete_strict_404: true,
            log_json: false,
        };
        let cfg = AppConfig::resolve(args, |key| match key {
            "DATA_ROOT" => Some("/env/root".into()),
            "MIN_FREE_GB" => Some("2".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.data_root, PathBuf::from("/tmp/blobs"));
        assert_eq!(cfg.min_free_bytes(), 5 * GIB);
        assert_eq!(cfg.max_file_bytes, 10);
        assert!(cfg.delete_strict_404);
    }
}
