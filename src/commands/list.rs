//! List commands implementation

use crate::bus;

/// List all buses compiled into this binary
pub fn list_buses() {
    println!("Supported buses:");
    println!();
    for info in bus::available_buses() {
        if info.aliases.is_empty() {
            println!("  {:<10} - {}", info.name, info.description);
        } else {
            println!(
                "  {:<10} - {} (aliases: {})",
                info.name,
                info.description,
                info.aliases.join(", ")
            );
        }
    }
}
