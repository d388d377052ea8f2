use clap::Parser;

use qrlinker::config::{Args, StaticConfig, init_config};
use qrlinker::errors::QrLinkerError;
use qrlinker::runtime::run_server;
use qrlinker::system::init_logging;

#[actix_web::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.generate_config {
        println!("{}", StaticConfig::generate_sample_config());
        return;
    }

    init_config(Some(&args.config));
    let config = qrlinker::config::get_config();

    // 保持 guard 存活直到进程退出
    let _guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", QrLinkerError::dependency(format!("{:#}", e)).format_colored());
            std::process::exit(1);
        }
    };

    if let Err(e) = run_server(&config).await {
        eprintln!("{}", QrLinkerError::dependency(format!("{:#}", e)).format_colored());
        std::process::exit(1);
    }
}
