fn main() {
    if let Err(e) = evidence_engine::run_cli() {
        eprintln!("evidence-engine: {e}");
        std::process::exit(1);
    }
}
