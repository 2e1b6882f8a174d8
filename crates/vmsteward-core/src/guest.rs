// ── Guest command runner ──
//
// Runs a program inside a VM through the guest process manager and works
// out whether it succeeded. The exit code is the primary signal. When it
// is non-zero, the command's stdout (redirected to a file in the guest)
// is downloaded from the ESXi host and searched for known success
// markers, since plenty of Windows tooling exits non-zero on success.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use vmsteward_api::{EntityRef, GuestCredentials, GuestProcessId, ProgramSpec};

use crate::connection::Connection;
use crate::error::CoreError;

// ── Command ─────────────────────────────────────────────────────────

/// A program to run in the guest, plus how to judge its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCommand {
    program_path: String,
    arguments: String,
    description: Option<String>,
    output_file: Option<String>,
    success_outputs: Vec<String>,
    timeout: Duration,
}

impl GuestCommand {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// `program_path` is the executable inside the guest (e.g.
    /// `C:\Windows\System32\cmd.exe`), `arguments` its argument string.
    pub fn new(program_path: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            program_path: program_path.into(),
            arguments: arguments.into(),
            description: None,
            output_file: None,
            success_outputs: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Plain-text description used in logs and error messages.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into()).filter(|d: &String| !d.is_empty());
        self
    }

    /// Guest path stdout is redirected to. Needed to judge non-zero exits.
    pub fn output_file(mut self, path: impl Into<String>) -> Self {
        self.output_file = Some(path.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// Add an output substring that means success. `""` declares blank
    /// output acceptable.
    pub fn success_output(mut self, output: impl Into<String>) -> Self {
        self.success_outputs.push(output.into());
        self
    }

    pub fn success_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_outputs
            .extend(outputs.into_iter().map(Into::into));
        self
    }

    /// How long a still-running process is polled before giving up.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program_path(&self) -> &str {
        &self.program_path
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    pub fn output_file_path(&self) -> Option<&str> {
        self.output_file.as_deref()
    }

    pub fn accepted_outputs(&self) -> &[String] {
        &self.success_outputs
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Argument string actually sent, including the stdout redirect.
    pub fn launch_arguments(&self) -> String {
        match &self.output_file {
            Some(path) => format!("{} > {path}", self.arguments),
            None => self.arguments.clone(),
        }
    }

    fn blank_is_acceptable(&self) -> bool {
        self.success_outputs.iter().any(String::is_empty)
    }
}

impl fmt::Display for GuestCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "GuestCommand: {description}"),
            None => write!(f, "GuestCommand: {} {}", self.program_path, self.arguments),
        }
    }
}

/// How a guest command was judged successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSuccess {
    /// The process exited with code 0.
    ExitCode,
    /// Non-zero exit, but the output contained this accepted marker.
    MatchedOutput(String),
}

/// Strip CR/LF anywhere and spaces at either end, as written by `cmd.exe`.
fn normalize_output(raw: &str) -> String {
    raw.replace(['\r', '\n'], "").trim_matches(' ').to_owned()
}

// ── Interface ───────────────────────────────────────────────────────

/// Runs commands inside one VM as one guest OS user.
pub struct GuestOsInterface {
    conn: Arc<Connection>,
    vm_name: String,
    vm: EntityRef,
    auth: GuestCredentials,
}

impl GuestOsInterface {
    /// Resolve the VM and bind the guest login to it.
    pub async fn new(
        conn: Arc<Connection>,
        vm_name: &str,
        username: impl Into<String>,
        password: SecretString,
    ) -> Result<Self, CoreError> {
        let vm = conn.vm(vm_name).await?;
        Ok(Self {
            conn,
            vm_name: vm_name.to_owned(),
            vm,
            auth: GuestCredentials {
                username: username.into(),
                password,
            },
        })
    }

    pub fn vm(&self) -> &EntityRef {
        &self.vm
    }

    /// Start the command and return its guest pid. A pid of 0 is a
    /// launch failure.
    pub async fn run_command(&self, command: &GuestCommand) -> Result<GuestProcessId, CoreError> {
        let spec = ProgramSpec {
            program_path: command.program_path.clone(),
            arguments: command.launch_arguments(),
        };
        info!(vm = %self.vm_name, program = %spec.program_path, args = %spec.arguments, "running guest command");

        let (vm, auth, spec_ref) = (&self.vm, &self.auth, &spec);
        let pid = self
            .conn
            .call_processes(|m| async move { m.start_program(vm, auth, spec_ref).await })
            .await
            .map_err(|e| {
                CoreError::guest_os(format!(
                    "Could not run command in guest: '{}' Error: {e}",
                    spec.arguments
                ))
            })?;

        if !pid.is_valid() {
            return Err(CoreError::guest_os(format!(
                "No process id returned running {command}"
            )));
        }
        debug!(vm = %self.vm_name, %pid, "guest command started");
        Ok(pid)
    }

    /// Run the command to completion and judge the result.
    pub async fn run_command_and_check_result(
        &self,
        command: &GuestCommand,
    ) -> Result<CommandSuccess, CoreError> {
        let pid = self.run_command(command).await?;
        let interval = self.conn.polling.guest_poll_interval;
        let (vm, auth, pids) = (&self.vm, &self.auth, &[pid]);

        let mut waited = Duration::ZERO;
        let exit_code = loop {
            let processes = self
                .conn
                .call_processes(|m| async move { m.list_processes(vm, auth, pids).await })
                .await?;

            let Some(process) = processes.into_iter().next() else {
                return Err(CoreError::guest_os(format!(
                    "No process info returned by the guest OS. Can't check status of {command}"
                )));
            };

            match process.exit_code {
                Some(0) => {
                    info!(vm = %self.vm_name, %pid, "{command} succeeded");
                    return Ok(CommandSuccess::ExitCode);
                }
                Some(code) => break code,
                None if waited > command.timeout => {
                    return Err(CoreError::GuestOsTimeout {
                        message: format!("{command} did not finish"),
                        waited,
                    });
                }
                None => {
                    sleep(interval).await;
                    waited += interval;
                }
            }
        };

        warn!(vm = %self.vm_name, %pid, exit_code, "{command} exited non-zero, checking output");
        self.inspect_output(command, exit_code).await
    }

    async fn inspect_output(
        &self,
        command: &GuestCommand,
        exit_code: i32,
    ) -> Result<CommandSuccess, CoreError> {
        let Some(path) = command.output_file.as_deref() else {
            return Err(CoreError::ProcessUnknownResult {
                command: command.to_string(),
                exit_code,
            });
        };

        // The file manager stages the file on the ESXi host's web server
        // and hands back a one-time URL.
        let (vm, auth) = (&self.vm, &self.auth);
        let url = self
            .conn
            .call_files(|m| async move { m.initiate_file_transfer_from_guest(vm, auth, path).await })
            .await?
            .ok_or_else(|| {
                CoreError::guest_os(format!(
                    "Couldn't locate file {path} when running {command}: vCenter didn't return a URL"
                ))
            })?;

        let fetched = self.conn.downloads.fetch(url).await.map_err(|e| {
            CoreError::bad_state(format!(
                "Couldn't retrieve the output file {path} for {command}: {e}"
            ))
        })?;
        if !fetched.is_ok() {
            return Err(CoreError::bad_state(format!(
                "Didn't receive an appropriate response when retrieving the output file {path} \
                 for {command}. Expected HTTP 200, got {}: {}",
                fetched.status, fetched.reason
            )));
        }

        let output = normalize_output(&fetched.body);
        debug!(vm = %self.vm_name, output = %output, "guest command output");

        if output.trim().is_empty() && command.blank_is_acceptable() {
            return Err(CoreError::AmbiguousResult {
                command: command.to_string(),
                exit_code,
            });
        }

        if let Some(marker) = command
            .success_outputs
            .iter()
            .find(|marker| output.contains(marker.as_str()))
        {
            info!(vm = %self.vm_name, marker = %marker, "{command} output matched");
            return Ok(CommandSuccess::MatchedOutput(marker.clone()));
        }

        Err(CoreError::BadOutput {
            command: command.to_string(),
            exit_code,
            output,
        })
    }
}
