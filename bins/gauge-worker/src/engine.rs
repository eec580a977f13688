/// Execution Engine - Abstraction for Code Execution
///
/// The engine knows HOW to run a candidate (Docker here) and returns raw
/// outputs; it never decides whether a test passed. Scoring lives in the
/// evaluator.
use crate::config::LanguageConfig;
use crate::evaluator::{CandidateRun, CompilationResult, TestExecutionOutput};
use anyhow::{bail, Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Safety limits to prevent pathological inputs from reaching Docker
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

const WORK_DIR: &str = "/code";

fn check_size(what: &str, content: &str, limit: usize) -> Result<()> {
    if content.len() > limit {
        bail!("{} exceeds maximum size of {} bytes", what, limit);
    }
    Ok(())
}

/// Why a candidate produced no usable run
#[derive(Debug)]
pub enum EngineFailure {
    /// Nothing ran: image, container or source setup failed
    Setup(anyhow::Error),
    /// The candidate started but its outputs could not be collected
    Collection(anyhow::Error),
}

pub trait ExecutionEngine {
    /// Compile `source_code` once and run it on every stdin in `inputs`, in order.
    async fn run_candidate(
        &self,
        source_code: &str,
        inputs: &[String],
    ) -> std::result::Result<CandidateRun, EngineFailure>;
}

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
        }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Drop cannot be async; removal is best effort
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

/// Output of one exec inside a running container
struct ExecOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i64>,
}

/// Docker-based engine: one container per candidate, network disabled,
/// memory and CPU capped from the language configuration.
pub struct DockerEngine {
    docker: Docker,
    language: LanguageConfig,
}

impl DockerEngine {
    pub fn new(language: LanguageConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker, language })
    }

    fn memory_limit(&self) -> i64 {
        (self.language.memory_limit_mb as i64) * 1024 * 1024
    }

    fn cpu_limit(&self) -> i64 {
        (self.language.cpu_limit as f64 * 1_000_000_000.0) as i64
    }

    /// Pull the image if it is not cached locally
    async fn ensure_image(&self) -> Result<()> {
        let image = self.language.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self) -> Result<String> {
        let container_name = format!("gauge-{}", uuid::Uuid::new_v4());
        let config = Config {
            image: Some(self.language.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            entrypoint: Some(vec![]),
            network_disabled: Some(true),
            working_dir: Some(WORK_DIR.to_string()),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_limit()),
                nano_cpus: Some(self.cpu_limit()),
                readonly_rootfs: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;
        Ok(container.id)
    }

    /// Run `command` under bash. `stdin` is streamed through the exec attach,
    /// so its size is not bounded by the kernel's argument length limit.
    async fn exec(&self, container_id: &str, command: String, stdin: Option<&[u8]>) -> Result<ExecOutput> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec!["bash".to_string(), "-c".to_string(), command]),
            attach_stdin: Some(stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(WORK_DIR.to_string()),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .context("Failed to create exec")?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };
        let mut stdout = String::new();
        let mut stderr = String::new();

        match self.docker.start_exec(&exec.id, Some(start_config)).await? {
            StartExecResults::Attached { mut output, mut input } => {
                // Feed stdin while draining output
                let feed = async {
                    if let Some(bytes) = stdin {
                        input.write_all(bytes).await.context("Failed to write exec stdin")?;
                        input.shutdown().await.context("Failed to close exec stdin")?;
                    }
                    Ok::<(), anyhow::Error>(())
                };
                let drain = async {
                    while let Some(msg) = output.next().await {
                        match msg.context("Failed to read exec output")? {
                            LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                            LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                            _ => {}
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                };
                let (fed, drained) = tokio::join!(feed, drain);
                drained?;
                if let Err(e) = fed {
                    // A program may exit without reading all of its input
                    debug!(error = %e, "Stdin not fully consumed");
                }
            }
            StartExecResults::Detached => bail!("Exec started detached"),
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code,
        })
    }

    async fn write_source_to_container(&self, container_id: &str, source_code: &str) -> Result<()> {
        check_size("Source code", source_code, MAX_SOURCE_CODE_BYTES)?;
        let command = format!("cat > {}", self.language.file_name);
        let output = self.exec(container_id, command, Some(source_code.as_bytes())).await?;
        if output.exit_code != Some(0) {
            bail!("Failed to write source code to container: {}", output.stderr);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(language = %self.language.name))]
    async fn compile_in_container(&self, container_id: &str) -> Result<CompilationResult> {
        let compile_command = match &self.language.compile_command {
            Some(command) => command,
            None => return Ok(CompilationResult::success()),
        };

        let start_time = Instant::now();
        let timeout = Duration::from_millis(self.language.compile_timeout_ms);
        let output = match tokio::time::timeout(timeout, self.exec(container_id, format!("{} 2>&1", compile_command), None)).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(timeout_ms = self.language.compile_timeout_ms, "Compilation timed out");
                return Ok(CompilationResult::failure("Compilation timed out"));
            }
        };

        let compilation_time_ms = start_time.elapsed().as_millis() as u64;
        if output.exit_code == Some(0) {
            debug!(compilation_time_ms, "Compilation succeeded");
            Ok(CompilationResult::success())
        } else {
            let message = format!("{}{}", output.stdout, output.stderr);
            warn!(
                compilation_time_ms,
                error_preview = message.lines().next().unwrap_or(""),
                "Compilation failed"
            );
            Ok(CompilationResult::failure(message))
        }
    }

    async fn execute_test_in_container(&self, container_id: &str, input: &str) -> Result<TestExecutionOutput> {
        check_size("Test input", input, MAX_TEST_INPUT_BYTES)?;

        let start_time = Instant::now();
        let command = self.language.run_command.clone();
        let timeout_ms = self.language.test_timeout_ms;

        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.exec(container_id, command, Some(input.as_bytes())),
        )
        .await;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let output = output?;
                let mut stderr = output.stderr;
                let runtime_error = output.exit_code != Some(0);
                if output.exit_code == Some(137) {
                    stderr.push_str("\n[Killed: likely exceeded memory limit]");
                } else if output.exit_code == Some(139) {
                    stderr.push_str("\n[Killed: segmentation fault]");
                }
                Ok(TestExecutionOutput {
                    stdout: output.stdout,
                    stderr,
                    execution_time_ms,
                    timed_out: false,
                    runtime_error,
                })
            }
            Err(_) => {
                warn!(execution_time_ms, timeout_ms, "Test execution timed out");
                Ok(TestExecutionOutput {
                    stdout: String::new(),
                    stderr: "[Execution timed out]".to_string(),
                    execution_time_ms,
                    timed_out: true,
                    runtime_error: false,
                })
            }
        }
    }
}

impl ExecutionEngine for DockerEngine {
    async fn run_candidate(
        &self,
        source_code: &str,
        inputs: &[String],
    ) -> std::result::Result<CandidateRun, EngineFailure> {
        let started = Instant::now();
        self.ensure_image().await.map_err(EngineFailure::Setup)?;
        let container_id = self.create_container().await.map_err(EngineFailure::Setup)?;
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")
            .map_err(EngineFailure::Setup)?;
        self.write_source_to_container(&container_id, source_code)
            .await
            .map_err(EngineFailure::Setup)?;

        let compilation = self
            .compile_in_container(&container_id)
            .await
            .map_err(EngineFailure::Collection)?;
        if !compilation.success {
            return Ok(CandidateRun {
                compilation,
                outputs: Vec::new(),
            });
        }

        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let output = self
                .execute_test_in_container(&container_id, input)
                .await
                .map_err(EngineFailure::Collection)?;
            outputs.push(output);
        }

        info!(
            tests = inputs.len(),
            runtime_errors = outputs.iter().filter(|o| o.runtime_error).count(),
            timeouts = outputs.iter().filter(|o| o.timed_out).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Candidate executed"
        );

        Ok(CandidateRun { compilation, outputs })
    }
}
