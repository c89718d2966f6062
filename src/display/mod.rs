use std::fmt::{self, Display, Formatter};

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};

use crate::summary::{BootstrapSummary, Quantity};

fn number(x: f64) -> String {
    if x.is_nan() {
        "–".to_string()
    } else if x != 0.0 && (x.abs() >= 1e4 || x.abs() < 1e-3) {
        format!("{x:.3e}")
    } else {
        format!("{x:.4}")
    }
}

impl Quantity {
    fn label(&self) -> String {
        match self {
            Quantity::Outcome { arm } => format!("Y({arm}; α)"),
            Quantity::Direct => "Direct  Y(1; α) - Y(0; α)".to_string(),
            Quantity::Indirect { reference } => format!("Indirect  Y(0; α) - Y(0; {reference})"),
        }
    }
}

impl BootstrapSummary {
    /// Render as a table.
    pub fn display(&self) -> String {
        let mut title_table = Table::new();
        title_table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .add_row(vec![
                Cell::new(format!(
                    "Cluster bootstrap, {} repetitions, {:.0}% intervals",
                    self.samples,
                    100.0 * self.level
                ))
                .set_alignment(CellAlignment::Center),
            ]);

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(
                ["Quantity", "α", "Mean", "Variance", "SE", "Percentile", "Normal"]
                    .into_iter()
                    .map(|h| Cell::new(h).set_alignment(CellAlignment::Center))
                    .collect::<Vec<_>>(),
            );

        for row in &self.rows {
            let s = &row.stats;
            table.add_row(vec![
                Cell::new(row.quantity.label()).set_alignment(CellAlignment::Left),
                Cell::new(format!("{:.3}", row.alpha)).set_alignment(CellAlignment::Right),
                Cell::new(number(s.mean)).set_alignment(CellAlignment::Right),
                Cell::new(number(s.variance)).set_alignment(CellAlignment::Right),
                Cell::new(number(s.se)).set_alignment(CellAlignment::Right),
                Cell::new(s.percentile.to_string()).set_alignment(CellAlignment::Right),
                Cell::new(s.normal.to_string()).set_alignment(CellAlignment::Right),
            ]);
        }

        format!("{title_table}\n{table}")
    }
}

impl Display for BootstrapSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}
