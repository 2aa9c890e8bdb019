//! nsfork CLI - query files and block devices inside another process's namespaces

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use nsfork_core::{
    config::default_proc_root, devices, nsfs::NsFs, ExecutorConfig, ForkExecutor, NamespaceRef,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nsfork")]
#[command(
    author,
    version,
    about = "Run file and device queries inside another process's namespaces"
)]
struct Cli {
    #[command(flatten)]
    target: Target,

    /// Proc mount used with --pid (defaults to NSFORK_PROC_ROOT env var or /proc)
    #[arg(long)]
    proc_root: Option<PathBuf>,

    /// Timeout in seconds
    #[arg(short, long, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Directory holding the mnt and net namespace handles
    #[arg(long)]
    ns: Option<PathBuf>,

    /// Process whose namespaces to enter
    #[arg(short, long)]
    pid: Option<u32>,
}

impl Target {
    fn namespace(self, proc_root: Option<PathBuf>) -> NamespaceRef {
        match (self.ns, self.pid) {
            (Some(dir), _) => NamespaceRef::new(dir),
            (None, Some(pid)) => {
                NamespaceRef::for_pid(proc_root.unwrap_or_else(default_proc_root), pid)
            }
            // clap enforces exactly one of the two
            (None, None) => unreachable!("no namespace target"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show metadata of a path
    Stat {
        path: PathBuf,
    },

    /// List a directory recursively
    Ls {
        dir: PathBuf,
    },

    /// Remove a file or an empty directory
    Rm {
        path: PathBuf,
    },

    /// List known block devices with their major:minor numbers
    Devices,

    /// Remove empty files below a directory
    Cleanup {
        dir: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("nsfork=info".parse()?))
        .init();

    let cli = Cli::parse();

    let ns = cli.target.namespace(cli.proc_root);
    let config = ExecutorConfig::builder()
        .default_timeout_secs(cli.timeout)
        .build();
    let executor = ForkExecutor::new(config)?;
    let timeout = executor.config().default_timeout;
    let fs = NsFs::with_default_timeout(&executor, &ns);

    tracing::debug!(ns = %ns.dir().display(), ?timeout, "target resolved");

    match cli.command {
        Commands::Stat { path } => print_json(&fs.stat(&path).await?)?,

        Commands::Ls { dir } => print_json(&fs.list_files(&dir).await?)?,

        Commands::Rm { path } => {
            fs.remove(&path).await?;
            tracing::info!(path = %path.display(), "removed");
        }

        Commands::Devices => {
            let devices: BTreeMap<_, _> = devices::list_known_devices(&executor, &ns, timeout)
                .await?
                .into_iter()
                .collect();
            print_json(&devices)?;
        }

        Commands::Cleanup { dir } => print_json(&fs.remove_empty_files(&dir).await?)?,
    }

    Ok(())
}
