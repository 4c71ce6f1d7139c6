//! English inflection for resource tokens: "product" <-> "products", "category" <-> "categories",
//! plus slug derivation for natural keys.

/// Irregular (singular, plural) pairs checked before suffix rules.
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("ox", "oxen"),
    ("leaf", "leaves"),
    ("life", "lives"),
    ("knife", "knives"),
    ("wife", "wives"),
    ("half", "halves"),
    ("shelf", "shelves"),
    ("house", "houses"),
    ("case", "cases"),
    ("base", "bases"),
    ("cause", "causes"),
    ("course", "courses"),
    ("purchase", "purchases"),
    ("warehouse", "warehouses"),
    ("status", "statuses"),
    ("bus", "buses"),
    ("campus", "campuses"),
    ("virus", "viruses"),
    ("quiz", "quizzes"),
];

const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "news",
    "data",
    "media",
    "feedback",
];

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Apply `f` to the last `_`-separated word of a snake_case token ("order_item" -> "order_items").
fn on_last_word(s: &str, f: impl Fn(&str) -> String) -> String {
    match s.rfind('_') {
        Some(i) => format!("{}{}", &s[..=i], f(&s[i + 1..])),
        None => f(s),
    }
}

fn singular_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return lower;
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(s, p)| *p == lower || *s == lower) {
        return singular.to_string();
    }
    if let Some(stem) = lower.strip_suffix("ies") {
        if stem.len() > 1 {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "ches", "shes", "xes", "zzes"] {
        if lower.ends_with(suffix) {
            return lower[..lower.len() - 2].to_string();
        }
    }
    if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        return lower;
    }
    match lower.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => lower,
    }
}

fn plural_word(word: &str) -> String {
    let singular = singular_word(word);
    if singular.is_empty() || UNCOUNTABLE.contains(&singular.as_str()) {
        return singular;
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, _)| *s == singular) {
        return plural.to_string();
    }
    let mut chars = singular.chars().rev();
    let last = chars.next().unwrap_or_default();
    let before_last = chars.next().unwrap_or_default();
    if last == 'y' && !is_vowel(before_last) {
        return format!("{}ies", &singular[..singular.len() - 1]);
    }
    if matches!(last, 's' | 'x' | 'z') || singular.ends_with("ch") || singular.ends_with("sh") {
        return format!("{}es", singular);
    }
    format!("{}s", singular)
}

/// Singular form of a resource token. Only the last snake_case word is inflected.
pub fn singularize(s: &str) -> String {
    on_last_word(s, singular_word)
}

/// Plural form of a resource token. Already-plural tokens come back unchanged.
pub fn pluralize(s: &str) -> String {
    on_last_word(s, plural_word)
}

/// URL-safe slug: lowercase alphanumerics separated by single dashes.
/// e.g. "Red Shirt (XL)" -> "red-shirt-xl"
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
