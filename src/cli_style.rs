/*!
 * Slotpool CLI Style System
 *
 * Styling helpers for terminal output: themed text, status icons and
 * comfy-table builders for pool statistics.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use slotpool_core::PoolStats;

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    /// Warning color (yellow)
    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    /// Error color (red)
    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

/// Unicode icons for visual feedback
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const STATS: &'static str = "📊";
    pub const ARROW_RIGHT: &'static str = "→";
}

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a key-value table for summaries (no outer borders)
pub fn stats_table(items: &[(&str, String)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (key, value) in items {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            Cell::new(value)
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
        ]);
    }

    table
}

/// One row of a pool statistics table
pub struct PoolRow<'a> {
    pub label: String,
    pub stats: &'a PoolStats,
}

/// Create a per-partition statistics table
pub fn pool_table(rows: &[PoolRow<'_>]) -> Table {
    let mut table = create_table();
    table.set_header(
        [
            "Partition", "In use", "Idle", "Peak", "Max", "Created", "Destroyed", "Timed out",
            "Util %",
        ]
        .into_iter()
        .map(|title| {
            Cell::new(title)
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold)
        }),
    );

    for row in rows {
        let stats = row.stats;
        let timed_out = if stats.timed_out > 0 {
            Cell::new(stats.timed_out).fg(Color::Red)
        } else {
            Cell::new(stats.timed_out).fg(Color::DarkGrey)
        };

        table.add_row(vec![
            Cell::new(&row.label).add_attribute(Attribute::Bold),
            Cell::new(stats.in_use),
            Cell::new(stats.idle),
            Cell::new(stats.max_in_use),
            Cell::new(stats.max_size),
            Cell::new(stats.created).fg(Color::Green),
            Cell::new(stats.destroyed),
            timed_out,
            Cell::new(format!("{:.1}", stats.utilization())),
        ]);
    }

    table
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
}

/// Print a styled warning message
pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}
