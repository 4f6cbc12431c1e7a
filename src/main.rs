fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = bookscrape::cli::Args::parse();
    bookscrape::cli::init_tracing(&args);
    if let Err(e) = bookscrape::cli::run(&args) {
        eprintln!("{}", e);
        if e.is_transient() {
            eprintln!("This looks temporary; try again later.");
        }
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
