//! Table output formatting using comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
        }
    }

    pub const fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    pub const fn use_colors(&self) -> bool {
        self.use_colors
    }

    /// A table with bold headers, sized to the terminal.
    pub fn table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(
                headers
                    .iter()
                    .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
            );
        if !self.use_colors {
            table.force_no_tty();
        }
        table
    }
}

/// Colored status cell. Colors follow the usual convention: green done,
/// yellow in progress, red failed, dim inert.
pub fn status_cell(status: &str, use_colors: bool) -> Cell {
    let cell = Cell::new(status);
    if !use_colors {
        return cell;
    }
    match status {
        "completed" => cell.fg(Color::Green).add_attribute(Attribute::Bold),
        "running" | "recovering" | "waiting" => cell.fg(Color::Yellow),
        "pending" | "available" => cell.fg(Color::Blue),
        "paused" | "busy" => cell.fg(Color::Cyan),
        "failed" | "rolled-back" => cell.fg(Color::Red).add_attribute(Attribute::Bold),
        "cancelled" | "skipped" | "compensated" | "offline" => {
            cell.add_attribute(Attribute::Dim)
        }
        _ => cell,
    }
}

/// Colors are on when stdout is a terminal and `NO_COLOR` is unset.
pub fn supports_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && console::Term::stdout().features().colors_supported()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_renders_rows() {
        let formatter = TableFormatter::with_colors(false);
        let mut table = formatter.table(&["Phase", "Status"]);
        table.add_row(vec![Cell::new("build"), status_cell("completed", false)]);

        let rendered = table.to_string();
        assert!(rendered.contains("Phase"));
        assert!(rendered.contains("build"));
        assert!(rendered.contains("completed"));
    }

    #[test]
    fn test_no_color_env_disables_colors() {
        temp_env::with_var("NO_COLOR", Some("1"), || {
            assert!(!supports_color());
        });
    }
}
