//! Checkpoint Management - argument persistence and shard sizing

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;
use tracing::{info, warn};

use super::args::AtorchArgs;
use crate::config::{is_token_field, token_placeholder};
use crate::error::ConfigError;
use crate::options::{OptionMap, OptionValue};

/// File written next to checkpoints.
pub const ARGS_FILE_NAME: &str = "atorch_args.json";
const SAVED_AT_KEY: &str = "saved_at";

/// Parse a checkpoint shard size: `"10GB"` (decimal), `"500MiB"` (binary),
/// `"1Gb"` (bits) or a plain byte count.
pub fn parse_size(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(bytes) = trimmed.parse::<u64>() {
        return Some(bytes);
    }

    const UNITS: &[(&str, f64)] = &[
        ("KIB", 1024.0),
        ("MIB", 1024.0 * 1024.0),
        ("GIB", 1024.0 * 1024.0 * 1024.0),
        ("TIB", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("KB", 1e3),
        ("MB", 1e6),
        ("GB", 1e9),
        ("TB", 1e12),
        ("B", 1.0),
    ];

    let upper = trimmed.to_ascii_uppercase();
    for (suffix, multiplier) in UNITS {
        let Some(number) = upper.strip_suffix(suffix) else {
            continue;
        };
        let n: f64 = number.trim().parse().ok()?;
        if !n.is_finite() || n < 0.0 {
            return None;
        }
        let mut bytes = n * multiplier;
        // Lowercase "b" on a decimal unit means bits.
        if suffix.len() == 2 && suffix != &"B" && trimmed.ends_with('b') {
            bytes /= 8.0;
        }
        return Some(bytes as u64);
    }
    None
}

impl AtorchArgs {
    /// Write the serialized arguments to `dir/atorch_args.json` under an
    /// exclusive lock. With `ignore_write_errors`, failures are logged and
    /// `Ok(None)` is returned.
    pub fn save_args(&self, dir: impl AsRef<Path>) -> Result<Option<PathBuf>, ConfigError> {
        match self.write_args(dir.as_ref()) {
            Ok(path) => {
                info!("💾 Arguments saved to {}", path.display());
                Ok(Some(path))
            }
            Err(e) if self.ignore_write_errors => {
                warn!("Ignoring error while saving arguments to {}: {}", dir.as_ref().display(), e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_args(&self, dir: &Path) -> Result<PathBuf, ConfigError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(ARGS_FILE_NAME);

        let lock_file = File::create(dir.join(format!("{ARGS_FILE_NAME}.lock")))?;
        lock_file.lock_exclusive()?;

        let mut json = self.to_json_value();
        if let Value::Object(map) = &mut json {
            map.insert(
                SAVED_AT_KEY.to_string(),
                Value::String(chrono::Local::now().to_rfc3339()),
            );
        }
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, &json)?;

        lock_file.unlock()?;
        Ok(path)
    }
}

/// Read arguments written by `save_args` back into an option mapping.
/// Redacted tokens are dropped, so they reload as unset.
pub fn load_saved_args(path: impl AsRef<Path>) -> Result<OptionMap, ConfigError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let json: Value = serde_json::from_reader(reader)?;

    match OptionValue::from_json(&json) {
        OptionValue::Map(mut map) => {
            map.remove(SAVED_AT_KEY);
            map.retain(|k, v| !(is_token_field(k) && *v == OptionValue::Str(token_placeholder(k))));
            Ok(map)
        }
        other => Err(ConfigError::InvalidType {
            field: path.display().to_string(),
            expected: "JSON object",
            found: other.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Callable;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("10GB"), Some(10_000_000_000));
        assert_eq!(parse_size("500MB"), Some(500_000_000));
        assert_eq!(parse_size("2GiB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("1.5KiB"), Some(1536));
        assert_eq!(parse_size("8Gb"), Some(1_000_000_000));
        assert_eq!(parse_size("123"), Some(123));
        assert_eq!(parse_size("123B"), Some(123));
        assert_eq!(parse_size(" 5 mb "), Some(5_000_000 / 8));
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert_eq!(parse_size("ten gigs"), None);
        assert_eq!(parse_size("-1GB"), None);
        assert_eq!(parse_size("GB"), None);
    }

    #[test]
    fn test_save_and_reload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut args = AtorchArgs::default();
        args.loss_func = Some(Callable::named("mse_loss", ()));
        args.excluded = Some(vec!["amp_native".to_string()]);

        let path = args.save_args(dir.path())?.expect("written");
        assert_eq!(path, dir.path().join(ARGS_FILE_NAME));

        let options = load_saved_args(&path)?;
        assert!(!options.contains_key(SAVED_AT_KEY));
        assert_eq!(options["loss_func"], OptionValue::str("mse_loss"));

        let reloaded = AtorchArgs::from_options(options)?;
        assert_eq!(reloaded.to_dict(), args.to_dict());
        assert!(reloaded.base.hub_token.is_none());
        Ok(())
    }

    #[test]
    fn test_redacted_token_reloads_as_unset() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut args = AtorchArgs::default();
        args.base.hub_token = Some("hf_secret".to_string());

        let path = args.save_args(dir.path())?.expect("written");
        assert!(!std::fs::read_to_string(&path)?.contains("hf_secret"));

        let options = load_saved_args(&path)?;
        assert!(!options.contains_key("hub_token"));

        let reloaded = AtorchArgs::from_options(options)?;
        assert!(reloaded.base.hub_token.is_none());
        Ok(())
    }

    #[test]
    fn test_write_errors_can_be_ignored() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "file in the way")?;

        let mut args = AtorchArgs::default();
        assert!(matches!(args.save_args(&blocker), Err(ConfigError::Io(_))));

        args.ignore_write_errors = true;
        assert_eq!(args.save_args(&blocker)?, None);
        Ok(())
    }
}
