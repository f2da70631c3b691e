#![forbid(unsafe_code)]

//! qcrawl: quarantine crawler CLI entry point.

mod cli_app;

fn main() {
    let code = match cli_app::main_with_args(std::env::args_os()) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("qcrawl: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
