//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! Server
//!     Listen: 127.0.0.1:8080
//!     Document root: /srv/www
//!     Base dir: .
//! Cache
//!     Directory: cache
//!     TTL: 86400s
//! Images
//!     Max dimensions: 1500x1500
//!     Default quality: 90
//!     Max file size: 10485760 bytes
//! Remote
//!     Enabled
//!     Allowed hosts: example.com, cdn.example.org
//!     Timeout: 10s
//!     Scratch: /tmp
//! ```
//!
//! The cache salt is never printed.
//!
//! ## Prune
//!
//! ```text
//! Pruned cache
//!     2 removed, 3 kept (5 total)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::cache::PruneStats;
use crate::config::ServiceConfig;
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn detail(label: &str, value: impl std::fmt::Display) -> String {
    format!("{}{}: {}", indent(1), label, value)
}

// ============================================================================
// Check
// ============================================================================

/// Format the effective configuration, one section per block.
pub fn format_config_summary(config: &ServiceConfig) -> Vec<String> {
    let mut lines = Vec::new();

    lines.push("Server".to_string());
    lines.push(detail("Listen", &config.server.listen));
    lines.push(detail("Document root", config.server.document_root.display()));
    lines.push(detail("Base dir", config.server.base_dir.display()));

    lines.push("Cache".to_string());
    lines.push(detail("Directory", config.cache.dir.display()));
    lines.push(detail("TTL", format!("{}s", config.cache.ttl_secs)));

    lines.push("Images".to_string());
    lines.push(detail(
        "Max dimensions",
        format!("{}x{}", config.images.max_width, config.images.max_height),
    ));
    lines.push(detail("Default quality", config.images.default_quality));
    lines.push(detail(
        "Max file size",
        format!("{} bytes", config.images.max_file_size),
    ));

    lines.push("Remote".to_string());
    if config.remote.enabled {
        lines.push(format!("{}Enabled", indent(1)));
        let hosts = if config.remote.allowed_hosts.is_empty() {
            "any".to_string()
        } else {
            config.remote.allowed_hosts.join(", ")
        };
        lines.push(detail("Allowed hosts", hosts));
        lines.push(detail("Timeout", format!("{}s", config.remote.timeout_secs)));
        lines.push(detail("Scratch", config.scratch_dir().display()));
    } else {
        lines.push(format!("{}Disabled", indent(1)));
    }

    lines
}

pub fn print_config_summary(config: &ServiceConfig) {
    for line in format_config_summary(config) {
        println!("{}", line);
    }
}

// ============================================================================
// Prune
// ============================================================================

pub fn format_prune_summary(cache_dir: &Path, stats: &PruneStats) -> Vec<String> {
    vec![
        format!("Pruned {}", cache_dir.display()),
        format!("{}{}", indent(1), stats),
    ]
}

pub fn print_prune_summary(cache_dir: &Path, stats: &PruneStats) {
    for line in format_prune_summary(cache_dir, stats) {
        println!("{}", line);
    }
}
