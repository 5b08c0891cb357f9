fn main() {
  std::process::exit(groupshell_cli::run());
}
