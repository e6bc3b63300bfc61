use prettytable::{self, format, row, Cell, Row};

use crate::store::Namespace;

const KEY_WIDTH: usize = 72;

/// Builds a `key | tick | cheque` table, ordered by key.
pub fn namespace_table(namespace: &Namespace, colored: bool) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    table.set_titles(row!["Bank key", "Tick", "Cheque"]);
    for (key, entry) in namespace.iter() {
        let mut tick = Cell::new(&entry.tick().to_string());
        if colored {
            tick = if entry.tick().value().is_some() {
                tick.style_spec("Fg")
            } else {
                tick.style_spec("Fy")
            };
        }
        table.add_row(Row::new(vec![
            Cell::new(&elide(key, KEY_WIDTH)),
            tick,
            Cell::new(&entry.cheque().to_string()),
        ]));
    }

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table
}

pub fn pprint_namespace(namespace: &Namespace, colored: bool) {
    namespace_table(namespace, colored).printstd();
}

fn elide(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_owned();
    }
    let mut out = s.chars().take(width.saturating_sub(3)).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cheque::{BankEntry, Cheque, Tick};
    use crate::fingerprint::BankKey;

    #[test]
    fn test_table_has_one_row_per_entry() {
        let ns: Namespace = [
            (
                BankKey::from("[[0,[4],[],0,[]]]".to_owned()),
                BankEntry::new(Cheque(serde_json::json!([1])), Tick::Int(3)),
            ),
            (
                BankKey::from("x".repeat(100)),
                BankEntry::new(Cheque::empty(), Tick::unknown()),
            ),
        ]
        .into_iter()
        .collect();
        let table = namespace_table(&ns, false);
        assert_eq!(table.len(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("[[0,[4],[],0,[]]]"));
        assert!(rendered.contains(&format!("{}...", "x".repeat(KEY_WIDTH - 3))));
        assert!(rendered.contains("null"));
    }
}
