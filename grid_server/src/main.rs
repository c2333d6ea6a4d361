#[tokio::main]
async fn main() {
    // Bootstrap already logged the cause.
    if grid_server::run_with_config().await.is_err() {
        std::process::exit(1);
    }
}
