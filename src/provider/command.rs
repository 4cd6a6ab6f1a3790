//! The `command` provider.
//!
//! Runs local shell commands. Recognized properties:
//!
//! - `create` (required): command run on create
//! - `update`: command run on update, `create` is rerun when absent
//! - `delete`: command run on delete, nothing runs when absent
//! - `environment`: map of extra environment variables
//! - `working_dir`: directory to run in
//!
//! Outputs are `stdout` (trimmed), `stderr` and `exit_code`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ProviderError;
use crate::resource::{Outputs, ResolvedResource};

use super::{Provider, ProviderContext};

/// Provider registered as `command`.
#[derive(Debug, Clone, Default)]
pub struct CommandProvider {
    shell: Option<String>,
}

/// Captured result of one command.
#[derive(Debug, Clone)]
struct CommandResult {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl CommandProvider {
    /// Creates a provider using the platform shell.
    #[must_use]
    pub const fn new() -> Self {
        Self { shell: None }
    }

    /// Uses `shell -c <command>` instead of the platform default.
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: Some(shell.into()),
        }
    }

    fn command_for(&self, script: &str) -> Command {
        let mut cmd = match &self.shell {
            Some(shell) => {
                let mut cmd = Command::new(shell);
                cmd.arg("-c").arg(script);
                cmd
            }
            None if cfg!(windows) => {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(script);
                cmd
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Runs `script` with the resource's environment and working directory.
    async fn execute(
        &self,
        resource: &ResolvedResource,
        script: &str,
        ctx: &ProviderContext,
    ) -> Result<CommandResult, ProviderError> {
        let resource_type = resource.resource_type.as_str();
        let mut cmd = self.command_for(script);

        if let Some(env) = resource.properties.get("environment") {
            let env = env.as_object().ok_or_else(|| {
                ProviderError::permanent(resource_type, "'environment' must be a map")
            })?;
            for (key, value) in env {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(key, value);
            }
        }

        if let Some(dir) = resource.str_property("working_dir") {
            cmd.current_dir(dir);
        }

        debug!("Running command for {}: {script}", resource.id);

        let child = cmd
            .spawn()
            .map_err(|e| ProviderError::transient(resource_type, format!("failed to spawn command: {e}")))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| ProviderError::transient(resource_type, format!("failed to wait for command: {e}")))?,
            () = ctx.cancel.cancelled() => {
                return Err(ProviderError::transient(resource_type, "command cancelled"));
            }
        };

        let result = CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        };

        if output.status.success() {
            Ok(result)
        } else {
            let code = result
                .exit_code
                .map_or_else(|| String::from("signal"), |c| c.to_string());
            Err(ProviderError::permanent(
                resource_type,
                format!("command exited with {code}: {}", result.stderr),
            ))
        }
    }

    fn outputs(result: CommandResult) -> Outputs {
        Outputs::from([
            (String::from("stdout"), serde_json::Value::String(result.stdout)),
            (String::from("stderr"), serde_json::Value::String(result.stderr)),
            (
                String::from("exit_code"),
                result.exit_code.map_or(serde_json::Value::Null, serde_json::Value::from),
            ),
        ])
    }

    fn required<'a>(resource: &'a ResolvedResource, name: &str) -> Result<&'a str, ProviderError> {
        resource.str_property(name).ok_or_else(|| {
            ProviderError::permanent(
                &resource.resource_type,
                format!("'{name}' must be a string command"),
            )
        })
    }
}

#[async_trait]
impl Provider for CommandProvider {
    async fn create(&self, resource: &ResolvedResource, ctx: &ProviderContext) -> Result<Outputs, ProviderError> {
        let script = Self::required(resource, "create")?;
        self.execute(resource, script, ctx).await.map(Self::outputs)
    }

    async fn read(
        &self,
        _resource: &ResolvedResource,
        outputs: &Outputs,
        _ctx: &ProviderContext,
    ) -> Result<Option<Outputs>, ProviderError> {
        Ok(Some(outputs.clone()))
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        _prior: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<Outputs, ProviderError> {
        let script = match resource.str_property("update") {
            Some(script) => script,
            None => Self::required(resource, "create")?,
        };
        self.execute(resource, script, ctx).await.map(Self::outputs)
    }

    async fn delete(
        &self,
        resource: &ResolvedResource,
        _outputs: &Outputs,
        ctx: &ProviderContext,
    ) -> Result<(), ProviderError> {
        match resource.str_property("delete") {
            Some(script) => self.execute(resource, script, ctx).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use crate::resource::ResourceId;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn resolved(properties: serde_json::Value) -> ResolvedResource {
        ResolvedResource {
            id: ResourceId::from("build"),
            resource_type: String::from("command"),
            properties: serde_json::from_value::<BTreeMap<String, serde_json::Value>>(properties).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_captures_stdout() {
        let provider = CommandProvider::new();
        let res = resolved(json!({
            "create": "echo \"$GREETING\"",
            "environment": {"GREETING": "hello"}
        }));

        let outputs = provider.create(&res, &ProviderContext::default()).await.unwrap();
        assert_eq!(outputs["stdout"], json!("hello"));
        assert_eq!(outputs["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_permanent() {
        let provider = CommandProvider::new();
        let res = resolved(json!({"create": "echo bad >&2; exit 3"}));

        let err = provider.create(&res, &ProviderContext::default()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Permanent);
        assert!(err.message.contains("exited with 3"));
        assert!(err.message.contains("bad"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transient() {
        let provider = CommandProvider::with_shell("/definitely/not/a/shell");
        let res = resolved(json!({"create": "true"}));

        let err = provider.create(&res, &ProviderContext::default()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_missing_create_is_permanent() {
        let provider = CommandProvider::new();
        let err = provider
            .create(&resolved(json!({})), &ProviderContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_delete_without_command_is_noop() {
        let provider = CommandProvider::new();
        let res = resolved(json!({"create": "true"}));
        assert!(provider.delete(&res, &Outputs::new(), &ProviderContext::default()).await.is_ok());
    }
}
