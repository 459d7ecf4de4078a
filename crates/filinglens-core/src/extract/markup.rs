use scraper::{ElementRef, Html, Selector};

/// Converts filing markup to readable structured text.
///
/// Tables become pipe-delimited rows, headings become `#`-prefixed
/// lines, and list items get a dash. Everything else collapses to
/// plain paragraphs. Unparseable markup degrades to whitespace-collapsed
/// text rather than failing.
pub fn markup_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let Ok(selector) = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, table, pre") else {
        return collapse_whitespace(&document.root_element().text().collect::<String>());
    };

    let mut blocks: Vec<String> = Vec::new();

    for element in document.select(&selector) {
        // Text inside tables is rendered by the table itself.
        if element.value().name() != "table" && has_table_ancestor(&element) {
            continue;
        }

        let block = match element.value().name() {
            "table" => render_table(&element),
            "li" => {
                let text = collapse_whitespace(&element.text().collect::<String>());
                if text.is_empty() {
                    String::new()
                } else {
                    format!("- {text}")
                }
            }
            name if name.starts_with('h') && name.len() == 2 => {
                let level = name[1..].parse::<usize>().unwrap_or(1).min(6);
                let text = collapse_whitespace(&element.text().collect::<String>());
                if text.is_empty() {
                    String::new()
                } else {
                    format!("{} {}", "#".repeat(level), text)
                }
            }
            _ => collapse_whitespace(&element.text().collect::<String>()),
        };

        if !block.is_empty() {
            blocks.push(block);
        }
    }

    if blocks.is_empty() {
        return collapse_whitespace(&document.root_element().text().collect::<String>());
    }

    blocks.join("\n\n")
}

fn has_table_ancestor(element: &ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "table")
}

fn render_table(table: &ElementRef) -> String {
    let Ok(row_selector) = Selector::parse("tr") else {
        return collapse_whitespace(&table.text().collect::<String>());
    };
    let Ok(cell_selector) = Selector::parse("th, td") else {
        return collapse_whitespace(&table.text().collect::<String>());
    };

    let mut rows = Vec::new();
    for row in table.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
            .collect();
        if cells.iter().any(|c| !c.is_empty()) {
            rows.push(format!("| {} |", cells.join(" | ")));
        }
    }

    rows.join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
