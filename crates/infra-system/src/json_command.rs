// JSON-over-stdio command runner
// Shared by the climate and spectrum adapters

use retrieval_core::port::ModelError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Collect the allow-listed variables of the current environment
pub(crate) fn allowed_env(allowlist: &[String]) -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(k, _)| allowlist.iter().any(|allowed| allowed == k))
        .collect()
}

/// An external command taking one JSON request on stdin and answering with
/// one JSON document on stdout
#[derive(Debug, Clone)]
pub struct JsonCommand {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    env_allowlist: Vec<String>,
}

impl JsonCommand {
    /// # Errors
    ///
    /// Returns `ModelError::Spawn` when `argv` is empty.
    ///
    /// # Example
    /// ```text
    /// let climate = JsonCommand::new(vec!["python3".into(), "clima_bridge.py".into()])?;
    /// let fluxes: ToaFluxes = climate.call(&["toa-fluxes"], &request).await?;
    /// ```
    pub fn new(argv: Vec<String>) -> Result<Self, ModelError> {
        if argv.is_empty() {
            return Err(ModelError::Spawn("empty command line".to_string()));
        }
        Ok(Self {
            argv,
            working_dir: None,
            env_allowlist: Vec::new(),
        })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Only these variables reach the child; everything else is cleared
    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Run the command once with `extra_args` appended
    ///
    /// # Errors
    ///
    /// * `ModelError::Spawn` - the program could not be started
    /// * `ModelError::Io` - stdin could not be written or the wait failed
    /// * `ModelError::Failed` - non-zero exit; carries stderr
    /// * `ModelError::Protocol` - stdout is not the expected JSON
    pub async fn call<Req, Resp>(&self, extra_args: &[&str], request: &Req) -> Result<Resp, ModelError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| ModelError::Protocol(e.to_string()))?;

        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .args(extra_args)
            .env_clear()
            .envs(allowed_env(&self.env_allowlist))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(program = %self.program(), args = ?extra_args, "Calling external model");
        let mut child = command
            .spawn()
            .map_err(|e| ModelError::Spawn(format!("{}: {}", self.program(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&body).await {
                Ok(()) => {}
                // The model may exit without reading its request; its exit status decides
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ModelError::Io(e.to_string())),
            }
            // Closing stdin signals the end of the request
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ModelError::Io(e.to_string()))?;

        if !output.status.success() {
            return Err(ModelError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ModelError::Protocol(format!("{} returned invalid JSON: {}", self.program(), e))
        })
    }
}
