fn main() {
    std::process::exit(bimailer::cli::main());
}
