use anyhow::{Context, anyhow};
use clap::Parser;
use std::sync::Arc;
use tracing::instrument;

use rxfer::{FileTransfer, Summary};

/// Secret value taken from the command line or environment; never printed.
#[derive(Clone)]
struct SecretArg(String);

impl std::str::FromStr for SecretArg {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SecretArg(s.to_string()))
    }
}

impl std::fmt::Debug for SecretArg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(clap::Args, Debug, Clone)]
struct SourceArgs {
    /// Host to download from and run `--on source` commands on
    #[arg(
        long = "source-host",
        id = "source_host",
        env = "RXFER_SOURCE_HOST",
        value_name = "HOST",
        help_heading = "Source endpoint"
    )]
    host: Option<String>,

    /// SSH port of the source host
    #[arg(
        long = "source-port",
        id = "source_port",
        env = "RXFER_SOURCE_PORT",
        default_value_t = remote::Credential::DEFAULT_PORT,
        value_name = "PORT",
        help_heading = "Source endpoint"
    )]
    port: u16,

    /// User to log in as on the source host
    #[arg(
        long = "source-user",
        id = "source_user",
        env = "RXFER_SOURCE_USER",
        value_name = "USER",
        help_heading = "Source endpoint"
    )]
    user: Option<String>,

    /// Password for the source host
    #[arg(
        long = "source-password",
        id = "source_password",
        env = "RXFER_SOURCE_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD",
        help_heading = "Source endpoint"
    )]
    password: Option<SecretArg>,

    /// Private key file for the source host (takes precedence over the password)
    #[arg(
        long = "source-key",
        id = "source_key",
        env = "RXFER_SOURCE_KEY",
        value_name = "PATH",
        help_heading = "Source endpoint"
    )]
    key: Option<std::path::PathBuf>,

    /// Passphrase of the source private key
    #[arg(
        long = "source-key-passphrase",
        id = "source_key_passphrase",
        env = "RXFER_SOURCE_KEY_PASSPHRASE",
        hide_env_values = true,
        value_name = "PASSPHRASE",
        help_heading = "Source endpoint"
    )]
    key_passphrase: Option<SecretArg>,
}

#[derive(clap::Args, Debug, Clone)]
struct TargetArgs {
    /// Host to upload to and run `--on target` commands on
    #[arg(
        long = "target-host",
        id = "target_host",
        env = "RXFER_TARGET_HOST",
        value_name = "HOST",
        help_heading = "Target endpoint"
    )]
    host: Option<String>,

    /// SSH port of the target host
    #[arg(
        long = "target-port",
        id = "target_port",
        env = "RXFER_TARGET_PORT",
        default_value_t = remote::Credential::DEFAULT_PORT,
        value_name = "PORT",
        help_heading = "Target endpoint"
    )]
    port: u16,

    /// User to log in as on the target host
    #[arg(
        long = "target-user",
        id = "target_user",
        env = "RXFER_TARGET_USER",
        value_name = "USER",
        help_heading = "Target endpoint"
    )]
    user: Option<String>,

    /// Password for the target host
    #[arg(
        long = "target-password",
        id = "target_password",
        env = "RXFER_TARGET_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD",
        help_heading = "Target endpoint"
    )]
    password: Option<SecretArg>,

    /// Private key file for the target host (takes precedence over the password)
    #[arg(
        long = "target-key",
        id = "target_key",
        env = "RXFER_TARGET_KEY",
        value_name = "PATH",
        help_heading = "Target endpoint"
    )]
    key: Option<std::path::PathBuf>,

    /// Passphrase of the target private key
    #[arg(
        long = "target-key-passphrase",
        id = "target_key_passphrase",
        env = "RXFER_TARGET_KEY_PASSPHRASE",
        hide_env_values = true,
        value_name = "PASSPHRASE",
        help_heading = "Target endpoint"
    )]
    key_passphrase: Option<SecretArg>,
}

/// Endpoint options of either role, borrowed from the parsed arguments.
struct Endpoint<'a> {
    role: Role,
    host: Option<&'a str>,
    port: u16,
    user: Option<&'a str>,
    password: Option<&'a SecretArg>,
    key: Option<&'a std::path::Path>,
    key_passphrase: Option<&'a SecretArg>,
}

impl Endpoint<'_> {
    async fn credential(&self) -> anyhow::Result<remote::Credential> {
        let role = self.role.name();
        let host = self
            .host
            .ok_or_else(|| anyhow!("--{role}-host is required for this command"))?;
        let user = self
            .user
            .ok_or_else(|| anyhow!("--{role}-user is required for this command"))?;
        if let Some(key) = self.key {
            let key_data = tokio::fs::read_to_string(key)
                .await
                .with_context(|| format!("failed reading {role} private key {key:?}"))?;
            return Ok(remote::Credential::with_key(
                host,
                self.port,
                user,
                key_data,
                self.key_passphrase.map(|passphrase| passphrase.0.clone()),
            ));
        }
        let password = self.password.ok_or_else(|| {
            anyhow!("--{role}-password or --{role}-key is required for this command")
        })?;
        Ok(remote::Credential::with_password(
            host,
            self.port,
            user,
            password.0.as_str(),
        ))
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum Role {
    Source,
    Target,
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Target => "target",
        }
    }
}

#[derive(clap::Subcommand, Debug, Clone)]
enum Command {
    /// Download a remote directory tree from the source endpoint
    Download {
        /// Directory on the source endpoint
        remote_dir: String,
        /// Local directory to write into (created if missing)
        local_dir: std::path::PathBuf,
    },
    /// Upload a local directory tree to the target endpoint
    Upload {
        /// Local directory to read from
        local_dir: std::path::PathBuf,
        /// Directory on the target endpoint (created if missing)
        remote_dir: String,
    },
    /// Upload a single file to the target endpoint
    UploadFile {
        local: std::path::PathBuf,
        remote: String,
    },
    /// Run a command and print its standard output
    Exec {
        /// Endpoint to run the command on
        #[arg(long, value_enum, default_value_t = Role::Source)]
        on: Role,
        command: String,
    },
    /// Run a command and stream its standard output into a local file
    Dump {
        /// Endpoint to run the command on
        #[arg(long, value_enum, default_value_t = Role::Source)]
        on: Role,
        command: String,
        local_file: std::path::PathBuf,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rxfer",
    version,
    about = "Move directory trees over SFTP and run commands over SSH",
    long_about = "`rxfer` synchronizes directory trees between the local machine and remote hosts over SFTP \
and runs commands on those hosts over SSH.

Downloads read from the source endpoint, uploads write to the target endpoint; commands can run on either.

EXAMPLES:
    # Download a remote directory with a summary
    rxfer --source-host old.example.com --source-user root --source-password secret \\
        download /var/lib/app ./app --summary

    # Upload it to another host using a key
    rxfer --target-host new.example.com --target-user root --target-key ~/.ssh/id_ed25519 \\
        upload ./app /var/lib/app

    # Read a value from the target host
    rxfer --target-host new.example.com --target-user root --target-password secret \\
        exec --on target 'printenv APP_KEY'"
)]
struct Args {
    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    target: TargetArgs,

    /// Only accept host keys listed in ~/.ssh/known_hosts
    #[arg(long, env = "RXFER_STRICT_HOST_KEYS", help_heading = "Connection")]
    strict_host_keys: bool,

    /// Maximum number of concurrent file downloads
    #[arg(
        long,
        env = "RXFER_CONCURRENCY",
        default_value_t = throttle::WorkQueue::DEFAULT_CONCURRENCY,
        value_name = "N",
        help_heading = "Connection"
    )]
    concurrency: usize,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help_heading = "Progress & output"
    )]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(long, default_value = "0", value_name = "N", help_heading = "Advanced settings")]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(long, default_value = "0", value_name = "N", help_heading = "Advanced settings")]
    max_blocking_threads: usize,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn endpoint(&self, role: Role) -> Endpoint<'_> {
        match role {
            Role::Source => Endpoint {
                role,
                host: self.source.host.as_deref(),
                port: self.source.port,
                user: self.source.user.as_deref(),
                password: self.source.password.as_ref(),
                key: self.source.key.as_deref(),
                key_passphrase: self.source.key_passphrase.as_ref(),
            },
            Role::Target => Endpoint {
                role,
                host: self.target.host.as_deref(),
                port: self.target.port,
                user: self.target.user.as_deref(),
                password: self.target.password.as_ref(),
                key: self.target.key.as_deref(),
                key_passphrase: self.target.key_passphrase.as_ref(),
            },
        }
    }

    fn host_key_policy(&self) -> remote::HostKeyPolicy {
        if self.strict_host_keys {
            remote::HostKeyPolicy::KnownHosts
        } else {
            remote::HostKeyPolicy::AcceptAny
        }
    }
}

/// Stand-in for the endpoint role a command does not use.
struct NotConnected(Role);

impl NotConnected {
    fn refuse<T>(&self) -> remote::Result<T> {
        Err(remote::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            format!("no {} session is open for this command", self.0.name()),
        )))
    }
}

impl remote::RemoteFs for NotConnected {
    async fn list(&self, _dir: &str) -> remote::Result<Vec<remote::RemoteEntry>> {
        self.refuse()
    }
    async fn get(&self, _remote: &str, _local: &std::path::Path) -> remote::Result<u64> {
        self.refuse()
    }
    async fn put(&self, _local: &std::path::Path, _remote: &str) -> remote::Result<u64> {
        self.refuse()
    }
    async fn exists(&self, _path: &str) -> remote::Result<bool> {
        self.refuse()
    }
    async fn mkdir(&self, _path: &str, _recursive: bool) -> remote::Result<()> {
        self.refuse()
    }
    async fn stat(&self, _path: &str) -> remote::Result<remote::RemoteStat> {
        self.refuse()
    }
}

/// What a subcommand produced; printed with --summary or -v.
enum Outcome {
    Transfer(Summary),
    Exec { exit_code: u32, stdout_bytes: u64 },
    Dump { path: std::path::PathBuf, bytes: u64 },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Outcome::Transfer(summary) => write!(f, "{summary}"),
            Outcome::Exec {
                exit_code,
                stdout_bytes,
            } => write!(
                f,
                "exit code: {}\nstdout: {}",
                exit_code,
                bytesize::ByteSize(*stdout_bytes)
            ),
            Outcome::Dump { path, bytes } => write!(
                f,
                "dumped: {}\nto: {:?}",
                bytesize::ByteSize(*bytes),
                path
            ),
        }
    }
}

async fn open_sftp(args: &Args, role: Role) -> anyhow::Result<Arc<remote::SftpSession>> {
    let credential = args.endpoint(role).credential().await?;
    let session = remote::SftpSession::connect(&credential, args.host_key_policy())
        .await
        .with_context(|| format!("failed to open {} SFTP session", role.name()))?;
    Ok(Arc::new(session))
}

async fn open_runner(
    args: &Args,
    role: Role,
) -> anyhow::Result<remote::CommandRunner<remote::SshShell>> {
    let credential = args.endpoint(role).credential().await?;
    let shell = remote::SshShell::connect(&credential, args.host_key_policy())
        .await
        .with_context(|| format!("failed to open {} SSH session", role.name()))?;
    Ok(remote::CommandRunner::new(Arc::new(shell)))
}

#[instrument(skip(args))]
async fn async_main(args: Args) -> anyhow::Result<Outcome> {
    let queue = throttle::WorkQueue::new(args.concurrency)?;
    match &args.command {
        Command::Download {
            remote_dir,
            local_dir,
        } => {
            let source = open_sftp(&args, Role::Source).await?;
            let transfer = FileTransfer::new(source, Arc::new(NotConnected(Role::Target)), queue);
            let summary = transfer
                .download_directory(remote_dir, local_dir)
                .await
                .into_result()?;
            Ok(Outcome::Transfer(summary))
        }
        Command::Upload {
            local_dir,
            remote_dir,
        } => {
            let target = open_sftp(&args, Role::Target).await?;
            let transfer = FileTransfer::new(Arc::new(NotConnected(Role::Source)), target, queue);
            let summary = transfer
                .upload_directory(local_dir, remote_dir)
                .await
                .into_result()?;
            Ok(Outcome::Transfer(summary))
        }
        Command::UploadFile { local, remote } => {
            let target = open_sftp(&args, Role::Target).await?;
            let transfer = FileTransfer::new(Arc::new(NotConnected(Role::Source)), target, queue);
            let summary = transfer.upload_file(local, remote).await.into_result()?;
            Ok(Outcome::Transfer(summary))
        }
        Command::Exec { on, command } => {
            let runner = open_runner(&args, *on).await?;
            let output = runner.run(command).await?;
            print!("{}", output.stdout);
            Ok(Outcome::Exec {
                exit_code: output.exit_code,
                stdout_bytes: output.stdout_bytes,
            })
        }
        Command::Dump {
            on,
            command,
            local_file,
        } => {
            let runner = open_runner(&args, *on).await?;
            let output = runner.run_to_file(command, local_file).await?;
            Ok(Outcome::Dump {
                path: local_file.clone(),
                bytes: output.stdout_bytes,
            })
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
