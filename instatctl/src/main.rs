use clap::Parser;

fn main() {
    let cli = instatctl::Cli::parse();
    if let Err(err) = instatctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
