//! ASCII art banner for shardlord.

use super::colors::SemanticStyle;

/// The full shardlord banner.
const BANNER: &str = r"
  ⬡ S H A R D L O R D
";

/// Prints the full banner with styling.
pub fn print_banner() {
    println!("{}", BANNER.info());
    println!("  {}", "The control plane for sharded PostgreSQL clusters".muted());
    println!();
}

/// Prints the version banner.
pub fn print_version_banner(version: &str) {
    println!();
    println!(
        "  {} {} {}",
        "⬡".info(),
        "shardlord".header(),
        format!("v{version}").muted()
    );
    println!("  {}", "The control plane for sharded PostgreSQL clusters".muted());
    println!();
}
