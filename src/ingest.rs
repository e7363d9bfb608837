//! Normalizes raw ISBNdb payloads into `Book` records.
//!
//! Parsing is pure and total: every item in the payload's `data` list yields
//! exactly one record, with malformed fields defaulted rather than dropped.

use serde_json::Value;

use crate::model::Book;

/// Parse a raw ISBNdb response. A missing or empty `data` list yields an
/// empty vec; the caller treats that as "nothing to persist", not an error.
pub fn parse_books(raw: &Value) -> Vec<Book> {
    let items = match raw.get("data").and_then(Value::as_array) {
        Some(items) => items,
        None => return Vec::new(),
    };

    items
        .iter()
        .map(|book| {
            let title = sanitize_str(book.get("title"));
            let long_title = {
                let long = sanitize_str(book.get("title_long"));
                if long.is_empty() {
                    title.clone()
                } else {
                    long
                }
            };
            Book {
                isbn13: sanitize_str(book.get("isbn13")),
                title,
                long_title,
                authors: sanitize_str(book.get("authors")),
                publisher: sanitize_str(book.get("publisher")),
                date_published: sanitize_str(book.get("date_published")),
                synopsis: sanitize_str(book.get("synopsis")),
                language: sanitize_str(book.get("language")),
                subjects: sanitize_str(book.get("subjects")),
                edition: sanitize_str(book.get("edition")),
                isbn: sanitize_str(book.get("isbn")),
                isbn10: sanitize_str(book.get("isbn10")),
                dewey_decimal: sanitize_str(book.get("dewey_decimal")),
                cover: sanitize_str(book.get("image_original")),
                binding: sanitize_str(book.get("binding")),
                dimensions: sanitize_str(book.get("dimensions")),
                pages: sanitize_int(book.get("pages")),
                msrp: sanitize_float(book.get("msrp")),
            }
        })
        .collect()
}

/// Null becomes empty, list values join with `", "`, NUL bytes are stripped
/// and the result is trimmed.
pub fn sanitize_str(value: Option<&Value>) -> String {
    let joined = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => scalar_to_string(other),
    };
    joined.replace('\0', "").trim().to_string()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse numeric-looking values, default 0 otherwise.
pub fn sanitize_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| {
            n.as_f64().map(|f| f as i64).unwrap_or(0)
        }),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse numeric-looking values, default 0.0 otherwise.
pub fn sanitize_float(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_or_missing_data_yields_nothing() {
        assert!(parse_books(&json!({})).is_empty());
        assert!(parse_books(&json!({"data": []})).is_empty());
        assert!(parse_books(&json!({"data": null})).is_empty());
        assert!(parse_books(&json!("garbage")).is_empty());
    }

    #[test]
    fn well_formed_record_parses() {
        let raw = json!({
            "data": [{
                "isbn13": "9781593279509",
                "title": "The Rust Programming Language",
                "title_long": "The Rust Programming Language (Covers Rust 2018)",
                "authors": ["Steve Klabnik", "Carol Nichols"],
                "publisher": "No Starch Press",
                "date_published": "2019-08-12",
                "language": "en",
                "subjects": ["Computers", "Programming"],
                "dewey_decimal": ["005.133"],
                "image_original": "https://images.example/cover.jpg",
                "binding": "Paperback",
                "dimensions": ["Height: 9.25 in", "Width: 7 in"],
                "pages": 560,
                "msrp": 39.95
            }]
        });

        let books = parse_books(&raw);
        assert_eq!(books.len(), 1);
        let book = &books[0];
        assert_eq!(book.authors, "Steve Klabnik, Carol Nichols");
        assert_eq!(book.subjects, "Computers, Programming");
        assert_eq!(book.dimensions, "Height: 9.25 in, Width: 7 in");
        assert_eq!(book.pages, 560);
        assert_eq!(book.msrp, 39.95);
    }

    #[test]
    fn malformed_fields_are_defaulted_never_dropped() {
        let raw = json!({
            "data": [
                {"isbn13": "9780000000001", "pages": "12x", "msrp": "n/a", "authors": null},
                {"isbn13": "9780000000002", "title": null, "pages": null},
                {}
            ]
        });

        let books = parse_books(&raw);
        assert_eq!(books.len(), 3);
        assert_eq!(books[0].pages, 0);
        assert_eq!(books[0].msrp, 0.0);
        assert_eq!(books[0].authors, "");
        assert_eq!(books[1].title, "");
        assert_eq!(books[1].pages, 0);
        assert_eq!(books[2].isbn13, "");
    }

    #[test]
    fn arbitrary_shapes_never_panic() {
        let raw = json!({
            "data": [
                {"pages": {"nested": true}, "msrp": [1, 2], "title": {"a": 1}},
                {"authors": [null, 7, "Real Author"], "edition": 2},
                {"isbn13": 12345}
            ]
        });

        let books = parse_books(&raw);
        assert_eq!(books.len(), 3);
        assert_eq!(books[0].pages, 0);
        assert_eq!(books[0].msrp, 0.0);
        assert_eq!(books[1].authors, ", 7, Real Author");
        assert_eq!(books[1].edition, "2");
        assert_eq!(books[2].isbn13, "12345");
    }

    #[test]
    fn numeric_strings_parse() {
        let raw = json!({
            "data": [{"pages": "320", "msrp": "19.99"}]
        });
        let book = &parse_books(&raw)[0];
        assert_eq!(book.pages, 320);
        assert_eq!(book.msrp, 19.99);
    }

    #[test]
    fn control_chars_stripped_and_trimmed() {
        let raw = json!({
            "data": [{"title": "  Tainted\u{0000} Title  "}]
        });
        assert_eq!(parse_books(&raw)[0].title, "Tainted Title");
    }

    #[test]
    fn long_title_falls_back_to_title() {
        let raw = json!({
            "data": [{"title": "Short", "title_long": null}]
        });
        assert_eq!(parse_books(&raw)[0].long_title, "Short");
    }
}
