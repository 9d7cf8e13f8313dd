fn main() {
    if let Err(err) = hwdoctor::cli::run() {
        hwdoctor::render::eprintln_error(&err);
        std::process::exit(hwdoctor::exit::exit_code(&err));
    }
}
