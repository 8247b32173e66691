pub mod progress;

pub fn print_banner() {
    println!("tonelink {}", env!("CARGO_PKG_VERSION"));
}
