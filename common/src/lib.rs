//! Shared bootstrap for rxfer tools
//!
//! Every binary parses its CLI into [`OutputConfig`] and [`RuntimeConfig`] and hands its async
//! entry point to [`run`], which installs the tracing subscriber, builds the tokio runtime,
//! reports errors and optionally prints the returned summary.

mod config;

pub use config::{OutputConfig, RuntimeConfig};

fn env_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new(output.log_directive())
    }
}

fn build_runtime(runtime: &RuntimeConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder.build()
}

/// Run `func` on a freshly built runtime.
///
/// Returns `None` if the runtime could not be built or `func` failed; the error has already been
/// reported on stderr unless `output.quiet` is set.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
    Summary: std::fmt::Display,
{
    // a second subscriber (e.g. in tests) is not an error
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&output))
        .with_writer(std::io::stderr)
        .try_init();
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to build tokio runtime: {error:#}");
            }
            return None;
        }
    };
    let res = runtime.block_on(func());
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_summary_on_success() {
        let output = OutputConfig::default();
        let runtime = RuntimeConfig {
            max_workers: 2,
            max_blocking_threads: 0,
        };
        let res = run(output, runtime, || async { Ok::<_, anyhow::Error>(42) });
        assert_eq!(res, Some(42));
    }

    #[test]
    fn run_returns_none_on_error() {
        let output = OutputConfig {
            quiet: true,
            ..Default::default()
        };
        let res = run(output, RuntimeConfig::default(), || async {
            Err::<u32, _>(anyhow::anyhow!("boom"))
        });
        assert_eq!(res, None);
    }
}
