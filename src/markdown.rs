//! Parsing of the markdown table the language model answers with.

use std::collections::{HashMap, VecDeque};

fn normalize(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

fn is_separator(line: &str) -> bool {
    let dashes = line.chars().filter(|&c| c == '-').count();
    dashes * 2 > line.chars().count()
        || line.starts_with("|--")
        || line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_cells(line: &str) -> Vec<String> {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Extracts data rows from a markdown table.
///
/// The first table line that is not a separator is the header. A data row is
/// kept only if it has as many cells as the header and its first cell is one
/// of `expected_keywords` (case-insensitive). Everything else the model wrote
/// around the table is ignored.
pub fn parse_table(text: &str, expected_keywords: &[&str]) -> Vec<Vec<String>> {
    let expected: Vec<String> = expected_keywords.iter().map(|k| normalize(k)).collect();

    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|line| line.contains('|'))
        .filter(|line| !is_separator(line));

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let width = split_cells(header).len();

    lines
        .map(split_cells)
        .filter(|cells| cells.len() == width)
        .filter(|cells| {
            cells
                .first()
                .is_some_and(|first| expected.contains(&normalize(first)))
        })
        .collect()
}

/// Lines parsed rows up with the batch keywords.
///
/// Rows are matched by keyword; repeated keywords consume matching rows in
/// order, and once a keyword's rows run out it reuses the last one. Returns
/// the label cells (everything after the keyword) for each keyword, stopping
/// at the first keyword that never got a row, so a short answer yields a
/// short result.
pub fn align_rows(keywords: &[&str], rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut by_keyword: HashMap<String, VecDeque<Vec<String>>> = HashMap::new();
    for mut cells in rows {
        if cells.is_empty() {
            continue;
        }
        let key = normalize(&cells.remove(0));
        by_keyword.entry(key).or_default().push_back(cells);
    }

    let mut last: HashMap<String, Vec<String>> = HashMap::new();
    keywords
        .iter()
        .map_while(|keyword| {
            let key = normalize(keyword);
            match by_keyword.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(cells) => {
                    last.insert(key, cells.clone());
                    Some(cells)
                }
                None => last.get(&key).cloned(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "Here is the table:\n\
        \n\
        | Original keyword | Category | Intent |\n\
        |---|---|---|\n\
        | Shoes | sports | buy |\n\
        | coffee | beverages | |\n\
        | tea | beverages |\n\
        | unexpected | other | browse |\n\
        \n\
        Let me know if you need anything else.";

    #[test]
    fn keeps_only_expected_full_width_rows() {
        let rows = parse_table(ANSWER, &["shoes", "coffee", "tea"]);
        assert_eq!(
            rows,
            vec![
                vec!["Shoes", "sports", "buy"],
                vec!["coffee", "beverages", ""],
            ]
        );
    }

    #[test]
    fn no_table_yields_nothing() {
        assert!(parse_table("I cannot help with that.", &["shoes"]).is_empty());
    }

    #[test]
    fn separator_detection() {
        assert!(is_separator("|---|---|"));
        assert!(is_separator("| :--- | ---: |"));
        assert!(!is_separator("| shoes | sports |"));
    }

    #[test]
    fn alignment_follows_batch_order() {
        let rows = parse_table(ANSWER, &["shoes", "coffee"]);
        let aligned = align_rows(&["coffee", "shoes"], rows);
        assert_eq!(aligned, vec![vec!["beverages", ""], vec!["sports", "buy"]]);
    }

    #[test]
    fn duplicate_keywords_consume_rows_in_order() {
        let rows = vec![
            vec!["gift".to_string(), "first".to_string()],
            vec!["gift".to_string(), "second".to_string()],
        ];
        let aligned = align_rows(&["gift", "gift"], rows);
        assert_eq!(aligned, vec![vec!["first"], vec!["second"]]);
    }

    #[test]
    fn collapsed_duplicate_reuses_last_row() {
        let rows = vec![
            vec!["gift".to_string(), "present".to_string()],
            vec!["card".to_string(), "stationery".to_string()],
        ];
        let aligned = align_rows(&["gift", "card", "Gift"], rows);
        assert_eq!(
            aligned,
            vec![vec!["present"], vec!["stationery"], vec!["present"]]
        );
    }

    #[test]
    fn alignment_stops_at_missing_keyword() {
        let rows = parse_table(ANSWER, &["shoes", "coffee", "tea"]);
        let aligned = align_rows(&["shoes", "tea", "coffee"], rows);
        assert_eq!(aligned, vec![vec!["sports", "buy"]]);
    }
}
