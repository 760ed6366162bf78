fn main() {
    if let Err(err) = json_table_import::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
