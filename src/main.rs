use pollroom::api::{self, PollHub};
use pollroom::config::{Config, LogFormat};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pollroom-server: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);

    let hub = PollHub::new(&config.poll);
    let routes = api::routes(hub);

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        auto_close = config.poll.auto_close,
        "Poll server listening"
    );

    warp::serve(routes)
        .run(config.bind_address())
        .await;
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_target(false).init(),
    }
}
