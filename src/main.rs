fn main() {
    if let Err(err) = tarja_sync::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
