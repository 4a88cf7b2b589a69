use kestrel_core::{error, info, log::init_logger, panic::configure_panic, signals::Shutdown, warn};
use kestreld_lib::{
    args::{Args, parse_args},
    daemon::{Daemon, EXIT_FAILURE, EXIT_INVALID_INVOCATION, EXIT_SUCCESS, SHUTDOWN_TIMEOUT},
};
use std::process::exit;

pub fn main() {
    let args = parse_args();
    if let Err(err) = args.validate() {
        eprintln!("{err}");
        exit(EXIT_INVALID_INVOCATION);
    }

    let log_dir = args.log_dir().map(|dir| dir.to_string_lossy().into_owned());
    init_logger(log_dir.as_deref(), &args.log_level);
    configure_panic();

    let runtime = match tokio::runtime::Builder::new_multi_thread().worker_threads(args.async_threads).enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed building the async runtime: {}", err);
            exit(EXIT_FAILURE);
        }
    };
    let code = runtime.block_on(run(args));
    info!("Kestreld has stopped...");
    exit(code);
}

async fn run(args: Args) -> i32 {
    let shutdown = Shutdown::new();
    if let Err(err) = shutdown.install_os_handler() {
        error!("Failed installing the signal handler: {}", err);
        return EXIT_FAILURE;
    }

    let node_config = match args.to_node_config() {
        Ok(node_config) => node_config,
        Err(err) => {
            error!("{}", err);
            return EXIT_INVALID_INVOCATION;
        }
    };
    let daemon = match Daemon::start(node_config, shutdown.clone()).await {
        Ok(daemon) => daemon,
        Err(err) => {
            error!("Failed starting the node: {}", err);
            return EXIT_FAILURE;
        }
    };

    shutdown.listener().await;
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, daemon.stop()).await {
        Ok(()) => EXIT_SUCCESS,
        Err(_) => {
            warn!("Graceful shutdown did not complete within {:?}, exiting", SHUTDOWN_TIMEOUT);
            EXIT_FAILURE
        }
    }
}
