use heck::ToKebabCase;

/// Lowercase, dash separated, ascii alphanumerics only: `"Hello, World!"` becomes `hello-world`.
///
/// Used for anchors and link targets built from page data.
pub fn slug(s: String) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.to_kebab_case()
}
