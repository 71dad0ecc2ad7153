fn main() {
    std::process::exit(artemis_host::host::startup());
}
