//! S-expression helpers shared by config files, definition sources and
//! replay scripts.
//!
//! Plists are accepted with either real keywords (`#:key`) or colon-prefixed
//! symbols (`:key`), since that is what `lexpr::from_str` produces for
//! Emacs-style input.

use lexpr::Value;

/// Whether a value reads as an empty list / false.
pub fn is_nil(value: &Value) -> bool {
    match value {
        Value::Nil | Value::Null | Value::Bool(false) => true,
        Value::Symbol(s) => s.as_ref() == "nil",
        _ => false,
    }
}

/// Look up the value stored after `key` in a plist.
pub fn plist_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Read a string or symbol atom.  Keywords lose their leading colon.
pub fn atom_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Symbol(s) => {
            let s = s.to_string();
            Some(s.strip_prefix(':').unwrap_or(&s).to_string())
        }
        Value::Keyword(k) => Some(k.to_string()),
        _ => None,
    }
}

/// Read a boolean: `t`/`#t` are true, `nil`/`#f`/`()` are false.
pub fn atom_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Symbol(s) if s.as_ref() == "t" => Some(true),
        v if is_nil(v) => Some(false),
        _ => None,
    }
}

pub fn atom_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub fn atom_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Items of a proper list.  `nil` and `()` yield an empty list; improper
/// lists and atoms yield `None`.
pub fn list_items(value: &Value) -> Option<Vec<&Value>> {
    let mut items = Vec::new();
    let mut current = value;
    loop {
        match current {
            Value::Cons(pair) => {
                items.push(pair.car());
                current = pair.cdr();
            }
            v if is_nil(v) => return Some(items),
            _ => return None,
        }
    }
}

pub fn get_string(value: &Value, key: &str) -> Option<String> {
    plist_value(value, key).and_then(atom_string)
}

pub fn get_u64(value: &Value, key: &str) -> Option<u64> {
    plist_value(value, key).and_then(atom_u64)
}

/// `t` or `nil` for s-expression output.
pub fn bool_sexp(b: bool) -> &'static str {
    if b {
        "t"
    } else {
        "nil"
    }
}

/// Escape a string for embedding in an s-expression string literal.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plist_lookup() {
        let v = lexpr::from_str(r#"(:name "Seated" :count 3 :ratio 0.5)"#).unwrap();
        assert_eq!(get_string(&v, "name").as_deref(), Some("Seated"));
        assert_eq!(get_u64(&v, "count"), Some(3));
        assert_eq!(plist_value(&v, "ratio").and_then(atom_f64), Some(0.5));
        assert!(plist_value(&v, "missing").is_none());
    }

    #[test]
    fn test_dangling_key_has_no_value() {
        let v = lexpr::from_str("(:a 1 :b)").unwrap();
        assert!(plist_value(&v, "b").is_none());
    }

    #[test]
    fn test_list_items() {
        let v = lexpr::from_str(r#"("a" b "c")"#).unwrap();
        let items: Vec<String> = list_items(&v)
            .unwrap()
            .into_iter()
            .filter_map(atom_string)
            .collect();
        assert_eq!(items, vec!["a", "b", "c"]);

        let empty = lexpr::from_str("()").unwrap();
        assert_eq!(list_items(&empty).map(|v| v.len()), Some(0));

        let atom = lexpr::from_str("42").unwrap();
        assert!(list_items(&atom).is_none());
    }

    #[test]
    fn test_atom_bool() {
        assert_eq!(atom_bool(&lexpr::from_str("t").unwrap()), Some(true));
        assert_eq!(atom_bool(&lexpr::from_str("nil").unwrap()), Some(false));
        assert_eq!(atom_bool(&lexpr::from_str("#t").unwrap()), Some(true));
        assert_eq!(atom_bool(&lexpr::from_str("3").unwrap()), None);
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn test_bool_sexp() {
        assert_eq!(bool_sexp(true), "t");
        assert_eq!(bool_sexp(false), "nil");
    }
}
