//! DOM queries shared by the HTML-scraping signers.
//!
//! Pages are parsed with `scraper` and queried synchronously. A parsed
//! `Html` is not `Send`, so it never lives across an `.await`: signers
//! fetch the body first and hand the text to these functions.

use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Parse a CSS selector once and keep it for the life of the process.
pub fn selector(cell: &'static OnceLock<Selector>, css: &str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static selector"))
}

/// Collapse runs of whitespace (including `&nbsp;`) into single spaces.
pub fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text content of an element, whitespace-collapsed.
pub fn text_of(element: ElementRef<'_>) -> String {
    collapse(&element.text().collect::<Vec<_>>().join(" "))
}

/// Flatten a markup fragment to its text.
pub fn fragment_text(markup: &str) -> String {
    text_of(Html::parse_fragment(markup).root_element())
}

/// Value of the first `<input>` whose `name` or `id` is `key`.
///
/// Entities are decoded by the parser, so `&amp;` comes back as `&`.
/// Empty values count as missing.
pub fn input_value(page: &str, key: &str) -> Option<String> {
    static INPUT: OnceLock<Selector> = OnceLock::new();
    let doc = Html::parse_document(page);
    doc.select(selector(&INPUT, "input"))
        .find(|el| el.value().attr("name") == Some(key) || el.value().id() == Some(key))
        .and_then(|el| el.value().attr("value"))
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// Value of the selected option in `<select name="...">`.
pub fn selected_option(page: &str, select_name: &str) -> Option<String> {
    static SELECT: OnceLock<Selector> = OnceLock::new();
    static SELECTED: OnceLock<Selector> = OnceLock::new();
    let doc = Html::parse_document(page);
    let select = doc
        .select(selector(&SELECT, "select"))
        .find(|el| el.value().attr("name") == Some(select_name))?;
    let option = select.select(selector(&SELECTED, "option[selected]")).next()?;
    option.value().attr("value").map(str::to_string)
}

/// Collapsed text of the first element matching `sel`, if non-empty.
pub fn first_text(page: &str, sel: &Selector) -> Option<String> {
    let doc = Html::parse_document(page);
    let text = text_of(doc.select(sel).next()?);
    (!text.is_empty()).then_some(text)
}

/// Trimmed attribute of the first element matching `sel`, if non-empty.
pub fn first_attr(page: &str, sel: &Selector, name: &str) -> Option<String> {
    let doc = Html::parse_document(page);
    let value = doc.select(sel).next()?.value().attr(name)?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Walk `levels` element parents up from `element`.
pub fn ancestor(element: ElementRef<'_>, levels: usize) -> Option<ElementRef<'_>> {
    let mut current = element;
    for _ in 0..levels {
        current = current.parent().and_then(ElementRef::wrap)?;
    }
    Some(current)
}
