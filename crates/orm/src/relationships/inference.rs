//! Naming conventions for relationship inference
//!
//! Type names are PascalCase (`FavoriteColor`), tables are snake_case plurals
//! (`favorite_colors`), and foreign keys are the snake_case singular plus
//! `_id` (`favorite_color_id`).

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
];

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

pub fn pluralize(name: &str) -> String {
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| name.ends_with(singular)) {
        let stem = &name[..name.len() - plural_stem_len(name, plural)];
        return format!("{}{}", stem, plural);
    }
    let before_last = name.chars().rev().nth(1);
    if name.ends_with('y') && before_last.map_or(false, |c| !is_vowel(c)) {
        format!("{}ies", &name[..name.len() - 1])
    } else if name.ends_with('s') || name.ends_with("sh") || name.ends_with("ch") || name.ends_with('x') || name.ends_with('z') {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

fn plural_stem_len(name: &str, plural: &str) -> usize {
    IRREGULAR
        .iter()
        .find(|(singular, p)| *p == plural && name.ends_with(singular))
        .map_or(0, |(singular, _)| singular.len())
}

pub fn singularize(name: &str) -> String {
    if let Some((singular, plural)) = IRREGULAR.iter().find(|(_, plural)| name.ends_with(plural)) {
        return format!("{}{}", &name[..name.len() - plural.len()], singular);
    }
    if name.ends_with("ies") && name.len() > 3 {
        format!("{}y", &name[..name.len() - 3])
    } else if name.ends_with("sses") || name.ends_with("ches") || name.ends_with("shes") || name.ends_with("xes") || name.ends_with("zes") {
        name[..name.len() - 2].to_string()
    } else if name.ends_with('s') && !name.ends_with("ss") && name.len() > 1 {
        name[..name.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

/// `FavoriteColor` -> `favorite_color`
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// `favorite_color` -> `FavoriteColor`
pub fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Table name for a type: `FavoriteColor` -> `favorite_colors`
pub fn tableize(type_name: &str) -> String {
    pluralize(&underscore(type_name))
}

/// Type name for a relationship or table name: `favorite_colors` -> `FavoriteColor`
pub fn classify(name: &str) -> String {
    camelize(&singularize(&underscore(name)))
}

/// Column referencing a type: `FavoriteColor` -> `favorite_color_id`
pub fn foreign_key(type_name: &str) -> String {
    format!("{}_id", underscore(type_name))
}

/// Display form of an attribute: `first_name` -> `First name`
pub fn humanize(name: &str) -> String {
    let spaced = name.strip_suffix("_id").unwrap_or(name).replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
