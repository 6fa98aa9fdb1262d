//! `marshal-worker <workspace_root>`
//!
//! Serves scheduling requests over stdin/stdout. Started by the `spawn` and
//! `respawn` schedulers; not meant to be run by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use marshal::runner::{CommandRunnerFactory, RunnerFactory};
use marshal::worker;

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("marshal-worker: cannot start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(serve());
    // A read on stdin may still be parked on a blocking thread.
    runtime.shutdown_background();
    code
}

async fn serve() -> ExitCode {
    let mut args = std::env::args_os().skip(1);
    let (Some(root), None) = (args.next(), args.next()) else {
        eprintln!("usage: marshal-worker <workspace_root>");
        return ExitCode::from(2);
    };
    let root = PathBuf::from(root);

    let runner = match CommandRunnerFactory.create(&root) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("marshal-worker: cannot load workspace {}: {}", root.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match worker::serve_stdio(runner).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("marshal-worker: {}", e);
            ExitCode::FAILURE
        }
    }
}
