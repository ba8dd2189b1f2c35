#[tokio::main]
async fn main() {
    if let Err(err) = sshmux::server::run_stdio().await {
        eprintln!("sshmux: {}", err);
        std::process::exit(1);
    }
}
