fn main() {
    if let Err(err) = fast_migration::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
