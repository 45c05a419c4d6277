fn main() {
    if let Err(err) = wikibase_bulk::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
