use env_logger::Env;

use bincompat::cli;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    std::process::exit(cli::run());
}
