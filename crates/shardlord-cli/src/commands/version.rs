//! Version command implementation.

use crate::style::banner::print_version_banner;

/// Version information for the CLI.
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() {
    print_version_banner(VERSION);
    println!("Build info:");
    println!("  Rust version: {}", rustc_version());
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
}

fn rustc_version() -> &'static str {
    // Fallback to a static string since we can't easily get rustc version at runtime
    "1.88+"
}
