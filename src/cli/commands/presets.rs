//! `presets` command
//!
//! Prints the class timing table.

use std::fmt::Write;

use crate::cli::args::{OutputFormat, PresetsArgs};
use crate::config::presets::ClassPreset;
use crate::error::DragTreeError;

/// Prints every class preset.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn run(args: &PresetsArgs) -> Result<(), DragTreeError> {
    let presets = ClassPreset::all();
    match args.format {
        OutputFormat::Human => print!("{}", render_table(&presets)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&presets)?),
    }
    Ok(())
}

fn render_table(presets: &[ClassPreset]) -> String {
    let mut out = format!(
        "{:<22} {:>8} {:>12} {:<10} {:>6}\n",
        "CLASS", "TIMEOUT", "MIN STAGING", "TREE", "GREEN"
    );
    for p in presets {
        let _ = writeln!(
            out,
            "{:<22} {:>8} {:>12} {:<10} {:>6}",
            p.class.display_name(),
            humantime::format_duration(p.staging_timeout).to_string(),
            humantime::format_duration(p.min_staging_duration).to_string(),
            p.sequence.as_label(),
            humantime::format_duration(p.green_delay).to_string(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_one_row_per_class() {
        let table = render_table(&ClassPreset::all());
        assert_eq!(table.lines().count(), 12);
        assert!(table.lines().any(|l| l.starts_with("Junior Dragster") && l.contains("1s")));
        assert!(table.lines().any(|l| l.starts_with("Top Fuel") && l.contains("400ms")));
    }
}
