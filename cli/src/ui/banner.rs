//! Banner printing.

/// Print the application banner.
pub fn print_banner() {
    println!("\n\x1b[1;36m┌──────────────────────────────────────┐\x1b[0m");
    println!("\x1b[1;36m│\x1b[0m  \x1b[1mclipsync\x1b[0m {:<27}\x1b[1;36m│\x1b[0m", env!("CARGO_PKG_VERSION"));
    println!("\x1b[1;36m│\x1b[0m  End-to-end encrypted clipboard sync \x1b[1;36m│\x1b[0m");
    println!("\x1b[1;36m└──────────────────────────────────────┘\x1b[0m\n");
}
