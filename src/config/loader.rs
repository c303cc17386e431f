//! Configuration loading with layered precedence.
//!
//! Layers, lowest to highest: application defaults, configuration file,
//! environment variables. The layers are composed with `MergeComposer` by hand
//! rather than through the derived `load()` so that typed environment
//! variables can fail fast instead of being silently ignored.
//!
//! # Environment Variable Handling
//!
//! Environment variables with unparseable values (e.g.
//! `STEPFLOW_CLEANUP_SKIP=maybe` instead of `true`/`false`) return an error
//! immediately, so misconfigurations surface before any step runs.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use mockable::{DefaultEnv, Env};
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};

use crate::config::AppConfig;
use crate::error::{ConfigError, Result};

const CONFIG_PATH_VAR: &str = "STEPFLOW_CONFIG_PATH";

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// Boolean value (`true`/`false`). Invalid values return an error.
    Bool,
    /// Unsigned 64-bit integer. Invalid values return an error.
    U64,
}

/// Specification for a single environment variable mapping.
struct EnvVarSpec {
    /// The environment variable name (e.g., `STEPFLOW_RETRY_MAX_ATTEMPTS`).
    env_var: &'static str,
    /// The JSON path segments (e.g., `["retry", "max_attempts"]`).
    path: &'static [&'static str],
    /// The expected value type.
    var_type: EnvVarType,
}

/// Table of all environment variables and their JSON paths.
const ENV_VAR_SPECS: &[EnvVarSpec] = &[
    EnvVarSpec {
        env_var: "STEPFLOW_POLL_INTERVAL_SECS",
        path: &["poll", "interval_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "STEPFLOW_POLL_TIMEOUT_SECS",
        path: &["poll", "timeout_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "STEPFLOW_RETRY_MAX_ATTEMPTS",
        path: &["retry", "max_attempts"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "STEPFLOW_RETRY_BACKOFF_MS",
        path: &["retry", "backoff_ms"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "STEPFLOW_CLEANUP_SKIP",
        path: &["cleanup", "skip"],
        var_type: EnvVarType::Bool,
    },
    EnvVarSpec {
        env_var: "STEPFLOW_CLEANUP_ACTION_TIMEOUT_SECS",
        path: &["cleanup", "action_timeout_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "STEPFLOW_FLOW_DEADLINE_SECS",
        path: &["flow", "deadline_secs"],
        var_type: EnvVarType::U64,
    },
];

/// Returns the list of environment variable names recognised by the config loader.
///
/// Tests use this to clear every `STEPFLOW_*` variable without keeping a
/// second list in sync.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    ENV_VAR_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Load a configuration file and push it to the composer.
///
/// Uses `cap_std::fs_utf8`: the parent directory is opened with ambient
/// authority and the file is read relative to it.
fn load_config_file(path: &Utf8Path, composer: &mut MergeComposer) -> Result<()> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("failed to open directory {parent}: {e}"),
        }
    })?;

    let content = dir.read_to_string(file_name).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: path.as_std_path().to_path_buf(),
            }
        } else {
            ConfigError::ParseError {
                message: format!("failed to read {path}: {e}"),
            }
        }
    })?;

    let value =
        toml::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    composer.push_file(value, Some(path.to_path_buf()));
    Ok(())
}

/// Load configuration from the process environment.
///
/// See [`load_config_with_env`].
///
/// # Errors
///
/// Returns the same errors as [`load_config_with_env`].
pub fn load_config(path: Option<&Utf8Path>) -> Result<AppConfig> {
    load_config_with_env(path, &DefaultEnv::new())
}

/// Load configuration with full layer precedence.
///
/// 1. Application defaults defined in the structs
/// 2. Configuration file: `path` when given, otherwise the first file
///    discovered via `STEPFLOW_CONFIG_PATH` or the XDG and dotfile locations
/// 3. `STEPFLOW_*` environment variables read through `env`
///
/// Later sources override earlier ones.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - an explicitly given configuration file does not exist
/// - a configuration file is malformed
/// - a typed environment variable has an invalid value (e.g. a non-number
///   for `STEPFLOW_RETRY_MAX_ATTEMPTS`)
/// - the merged layers do not form a valid configuration
pub fn load_config_with_env<E: Env>(path: Option<&Utf8Path>, env: &E) -> Result<AppConfig> {
    let mut composer = MergeComposer::new();

    // Layer 1: Defaults (serialised from AppConfig::default()).
    let defaults =
        serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::ParseError {
            message: format!("failed to serialise defaults: {e}"),
        })?;
    composer.push_defaults(defaults);

    // Layer 2: Configuration file.
    if let Some(explicit) = path {
        load_config_file(explicit, &mut composer)?;
    } else if let Some(discovered) = discover_config_file(env) {
        load_config_file(&discovered, &mut composer)?;
    }

    // Layer 3: Environment variables.
    let env_values = collect_env_vars(env)?;
    if !env_values.is_null() {
        composer.push_environment(env_values);
    }

    let config =
        AppConfig::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;

    Ok(config)
}

/// Find the first existing configuration file.
fn discover_config_file<E: Env>(env: &E) -> Option<Utf8PathBuf> {
    let from_env = env
        .string(CONFIG_PATH_VAR)
        .filter(|value| !value.is_empty())
        .map(Utf8PathBuf::from)
        .filter(|candidate| candidate.exists());
    from_env.or_else(|| {
        // The path variable was read through `env` above.
        let discovery = ConfigDiscovery::builder("stepflow")
            .config_file_name("config.toml")
            .dotfile_name(".stepflow.toml")
            .build();
        discovery
            .candidates()
            .into_iter()
            .filter(|candidate| candidate.exists())
            .find_map(|candidate| Utf8PathBuf::try_from(candidate).ok())
    })
}

/// Collect `STEPFLOW_*` environment variables into a JSON value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a typed environment variable has an
/// unparseable value.
fn collect_env_vars<E: Env>(env: &E) -> Result<Value> {
    let mut root = Map::new();

    for spec in ENV_VAR_SPECS {
        let Some(raw_value) = env.string(spec.env_var) else {
            continue;
        };
        let trimmed = raw_value.trim();

        let json_value = match spec.var_type {
            EnvVarType::Bool => match trimmed.parse::<bool>() {
                Ok(b) => Value::Bool(b),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: spec.env_var.to_owned(),
                        reason: format!("expected bool (true/false), got '{raw_value}'"),
                    }
                    .into());
                }
            },
            EnvVarType::U64 => match trimmed.parse::<u64>() {
                Ok(n) => Value::Number(n.into()),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: spec.env_var.to_owned(),
                        reason: format!("expected unsigned integer, got '{raw_value}'"),
                    }
                    .into());
                }
            },
        };

        insert_at_path(&mut root, spec.path, json_value);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

/// Insert a value at a nested path in a JSON map.
///
/// For a path like `["retry", "max_attempts"]`, this creates the intermediate
/// `retry` object if needed and inserts `max_attempts` within it.
fn insert_at_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((&field, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for &segment in parents {
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(obj) = entry.as_object_mut() else {
            return;
        };
        current = obj;
    }

    current.insert(field.to_owned(), value);
}
