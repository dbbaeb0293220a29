//! Canonical searchable text of an item.
//!
//! The external index ranks on this exact string, so the segment order and
//! the single-space separators must not change:
//!
//! `title kw1 kw2 [category ]description`
//!
//! The category segment (and its trailing separator) is left out entirely for
//! uncategorized items.

use super::Item;

pub fn searchable_text(item: &Item, category_title: Option<&str>) -> String {
    let keywords = item.keywords.join(" ");

    let mut text = String::with_capacity(
        item.title.len()
            + keywords.len()
            + category_title.map(|title| title.len() + 1).unwrap_or(0)
            + item.description.len()
            + 2,
    );

    text.push_str(&item.title);
    text.push(' ');
    text.push_str(&keywords);
    text.push(' ');
    if let Some(category_title) = category_title {
        text.push_str(category_title);
        text.push(' ');
    }
    text.push_str(&item.description);

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, keywords: &[&str], description: &str) -> Item {
        Item {
            title: title.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_categorized_item() {
        let item = item("Wifi setup", &["router", "network"], "Connect to the guest wifi");
        assert_eq!(
            searchable_text(&item, Some("Connectivity")),
            "Wifi setup router network Connectivity Connect to the guest wifi"
        );
    }

    #[test]
    fn test_uncategorized_item_omits_segment() {
        let item = item("Wifi setup", &["router"], "Guest access");
        assert_eq!(searchable_text(&item, None), "Wifi setup router Guest access");
    }

    #[test]
    fn test_empty_keywords_keep_separator() {
        let item = item("Printer", &[], "Color prints");
        assert_eq!(searchable_text(&item, None), "Printer  Color prints");
        assert_eq!(searchable_text(&item, Some("Office")), "Printer  Office Color prints");
    }

    #[test]
    fn test_empty_category_title_is_not_omitted() {
        let item = item("Printer", &["a4"], "Mono");
        assert_eq!(searchable_text(&item, Some("")), "Printer a4  Mono");
    }

    #[test]
    fn test_keeps_text_verbatim() {
        let item = item("  Café  ", &["Ünï"], "line\nbreak");
        assert_eq!(searchable_text(&item, None).as_bytes(), "  Café   Ünï line\nbreak".as_bytes());
    }
}
