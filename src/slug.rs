use uuid::Uuid;

/// Lowercase kebab-case slug of a title. ASCII letters and digits survive,
/// every other run of characters collapses into a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

/// Course slugs are globally unique: title slug plus 8 random characters.
pub fn course_slug(title: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slugify(title), &suffix[..8])
}

/// Candidates for a slug unique within a parent: `base`, `base-1`, `base-2`, ...
pub fn numbered(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_owned()).chain((1..).map(move |n| format!("{base}-{n}")))
}
