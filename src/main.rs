use assignment_checker::{config::Cli, exit_code, run};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        let code = exit_code(&e);
        if code == 1 {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(code);
    }
}
