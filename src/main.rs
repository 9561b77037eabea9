fn main() {
    let exit_code = blockscan::run_cli();
    std::process::exit(exit_code);
}
