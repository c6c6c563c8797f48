//! Naming strategy for generated surfaces.
//!
//! Pure functions map one declared resource noun to its HTTP mount path and
//! its gRPC method names. Keeping these free of any registry state makes
//! the conventions unit-testable on their own.

/// Split a CamelCase noun into lowercase words.
///
/// `"UserAddress"` becomes `["user", "address"]`. Digits stick to the word
/// they follow.
pub fn decamelize(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch.is_uppercase() && !current.is_empty() {
            words.push(current);
            current = String::new();
        }
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Pluralize an English noun.
///
/// Sibilant endings take `es`, a consonant-ish letter before `h` takes
/// `es`, vowel-plus-`y` swaps to `ies`, everything else appends `s`.
pub fn pluralize(noun: &str) -> String {
    let chars: Vec<char> = noun.chars().collect();
    let last = chars.last().copied();
    let prev = chars.len().checked_sub(2).and_then(|i| chars.get(i)).copied();

    let is_vowel = |c: char| "aeiou".contains(c.to_ascii_lowercase());

    match (prev, last) {
        (_, Some('s')) | (_, Some('x')) | (_, Some('z')) => format!("{noun}es"),
        (Some(p), Some('h')) if !"aeioudgkprt".contains(p.to_ascii_lowercase()) => {
            format!("{noun}es")
        }
        (Some(p), Some('y')) if is_vowel(p) => format!("{}ies", &noun[..noun.len() - 1]),
        _ => format!("{noun}s"),
    }
}

/// Derive the HTTP mount path for a resource noun.
///
/// Words are dash-joined with the last word pluralized and a leading
/// slash: `"UserAddress"` mounts at `/user-addresses`.
pub fn endpoint_path(noun: &str) -> String {
    let mut words = decamelize(noun);
    if let Some(last) = words.last_mut() {
        *last = pluralize(last);
    }
    format!("/{}", words.join("-"))
}

/// Derive a gRPC method name from an action name and a resource noun.
///
/// The action is camelized and prefixed to the noun; the noun itself is
/// pluralized only for `list`. `("get", "Item")` gives `GetItem`,
/// `("list", "Item")` gives `ListItems`.
pub fn rpc_method(action: &str, noun: &str) -> String {
    let object = if action == "list" {
        pluralize(noun)
    } else {
        noun.to_string()
    };
    format!("{}{}", camelize(action), object)
}

/// Turn a snake_case action name into CamelCase.
pub fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Dash-join a snake_case action name for use as an HTTP path segment.
pub fn path_segment(name: &str) -> String {
    name.replace('_', "-")
}
