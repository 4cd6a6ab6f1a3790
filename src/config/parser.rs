//! Stack file loading.
//!
//! Loading runs in a fixed order: `.env` file, YAML parse, required
//! environment check, `${env:NAME}` interpolation, then `KEEL_*`
//! overrides. Every failure here is a configuration error raised before
//! any graph is built.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, KeelError, Result};

use super::spec::StackConfig;

/// Default stack file names to search for.
pub const DEFAULT_STACK_FILES: &[&str] = &["keel.yaml", "keel.yml", "stack.yaml", "stack.yml"];

const ENV_PREFIX: &str = "${env:";

/// Loader for stack files.
#[derive(Debug, Default)]
pub struct StackParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl StackParser {
    /// Creates a new stack parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a stack file and applies the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed,
    /// or if an environment variable it needs is not set.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut stack = self.load_file(path)?;
        let env = |name: &str| std::env::var(name).ok();
        prepare(&mut stack, &env)?;
        Ok(stack)
    }

    /// Loads a stack file without touching the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading stack from: {}", path.display());

        if !path.exists() {
            return Err(KeelError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            KeelError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a stack from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML stack");

        let stack: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            KeelError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack '{}' with {} resources",
            stack.stack.name,
            stack.resources.len()
        );
        Ok(stack)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                KeelError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies an environment to a parsed stack.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] for a required or interpolated
/// variable that `env` does not define, and a validation error for
/// malformed overrides.
pub fn prepare<F>(stack: &mut StackConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    check_required_env(stack, env)?;
    interpolate(stack, env)?;
    apply_overrides(stack, env)?;
    Ok(())
}

/// Fails on the first required variable that is not set.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`].
pub fn check_required_env<F>(stack: &StackConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for name in &stack.required_env {
        if env(name).is_none() {
            return Err(KeelError::Config(ConfigError::MissingEnvVar { name: name.clone() }));
        }
    }
    Ok(())
}

/// Replaces `${env:NAME}` in every string property and output.
fn interpolate<F>(stack: &mut StackConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for resource in &mut stack.resources {
        for value in resource.properties.values_mut() {
            interpolate_value(value, env)?;
        }
    }
    for value in stack.outputs.values_mut() {
        interpolate_value(value, env)?;
    }
    Ok(())
}

fn interpolate_value<F>(value: &mut serde_json::Value, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_json::Value::String(s) if s.contains(ENV_PREFIX) => {
            *s = interpolate_str(s, env)?;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                interpolate_value(item, env)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_value(item, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Expands every `${env:NAME}` in `input`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] for an unset variable and a
/// parse error for an unterminated placeholder.
pub fn interpolate_str<F>(input: &str, env: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(ENV_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + ENV_PREFIX.len()..];
        let end = after.find('}').ok_or_else(|| {
            KeelError::Config(ConfigError::parse(format!("unterminated placeholder in '{input}'")))
        })?;

        let name = &after[..end];
        let value = env(name).ok_or_else(|| {
            KeelError::Config(ConfigError::MissingEnvVar {
                name: name.to_string(),
            })
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Applies `KEEL_*` overrides.
fn apply_overrides<F>(stack: &mut StackConfig, env: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(environment) = env("KEEL_ENVIRONMENT") {
        debug!("Overriding stack.environment from environment");
        stack.stack.environment = environment;
    }

    if let Some(concurrency) = env("KEEL_CONCURRENCY") {
        debug!("Overriding settings.concurrency from environment");
        let parsed = concurrency.parse::<usize>().map_err(|_| {
            ConfigError::validation(
                format!("KEEL_CONCURRENCY must be a positive integer, got '{concurrency}'"),
                "settings.concurrency",
            )
        })?;
        stack.settings.concurrency = Some(parsed);
    }

    if let Some(path) = env("KEEL_STATE_PATH") {
        debug!("Overriding settings.state_path from environment");
        stack.settings.state_path = Some(path);
    }

    Ok(())
}

/// Finds the stack file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_stack_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_STACK_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found stack file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(KeelError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_STACK_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const STACK: &str = r#"
stack:
  name: web
required_env: [API_TOKEN]
resources:
  - name: net
    type: "null"
    properties:
      cidr: 10.0.0.0/16
  - name: svc
    type: command
    properties:
      create: "deploy --token ${env:API_TOKEN} --network ${env:NET_NAME}"
      network: { ref: net.id }
outputs:
  network_id: { ref: net.id }
"#;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_minimal_stack() {
        let stack = StackParser::new()
            .parse_yaml("stack:\n  name: empty\n", None)
            .unwrap();
        assert_eq!(stack.stack.name, "empty");
        assert_eq!(stack.stack.environment, "dev");
        assert!(stack.resources.is_empty());
    }

    #[test]
    fn test_parse_full_stack() {
        let stack = StackParser::new().parse_yaml(STACK, None).unwrap();
        assert_eq!(stack.resources.len(), 2);
        assert_eq!(stack.resources[1].resource_type, "command");
        assert_eq!(stack.required_env, vec!["API_TOKEN"]);
        assert!(stack.outputs.contains_key("network_id"));
    }

    #[test]
    fn test_missing_required_env() {
        let mut stack = StackParser::new().parse_yaml(STACK, None).unwrap();
        let err = prepare(&mut stack, &env_of(&[("NET_NAME", "main")])).unwrap_err();
        assert!(matches!(
            err,
            KeelError::Config(ConfigError::MissingEnvVar { ref name }) if name == "API_TOKEN"
        ));
    }

    #[test]
    fn test_unset_interpolated_variable() {
        let mut stack = StackParser::new().parse_yaml(STACK, None).unwrap();
        let err = prepare(&mut stack, &env_of(&[("API_TOKEN", "t0k")])).unwrap_err();
        assert!(matches!(
            err,
            KeelError::Config(ConfigError::MissingEnvVar { ref name }) if name == "NET_NAME"
        ));
    }

    #[test]
    fn test_interpolation_and_overrides() {
        let mut stack = StackParser::new().parse_yaml(STACK, None).unwrap();
        let env = env_of(&[
            ("API_TOKEN", "t0k"),
            ("NET_NAME", "main"),
            ("KEEL_ENVIRONMENT", "prod"),
            ("KEEL_CONCURRENCY", "8"),
        ]);
        prepare(&mut stack, &env).unwrap();

        assert_eq!(
            stack.resources[1].properties["create"],
            serde_json::json!("deploy --token t0k --network main")
        );
        assert_eq!(stack.stack.environment, "prod");
        assert_eq!(stack.settings.concurrency, Some(8));
    }

    #[test]
    fn test_invalid_concurrency_override() {
        let mut stack = StackParser::new().parse_yaml("stack:\n  name: x\n", None).unwrap();
        assert!(prepare(&mut stack, &env_of(&[("KEEL_CONCURRENCY", "many")])).is_err());
    }

    #[test]
    fn test_unterminated_placeholder() {
        let env = env_of(&[]);
        assert!(interpolate_str("x ${env:OOPS", &env).is_err());
        assert_eq!(interpolate_str("plain", &env).unwrap(), "plain");
    }

    #[test]
    fn test_find_stack_file_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keel.yaml"), "stack:\n  name: x\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_stack_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("keel.yaml"));
    }
}
