/// Turns an identifier like `IRON_INGOT` into `Iron Ingot`.
///
/// Empty segments (from doubled or edge underscores) are dropped.
pub fn prettify_text(ugly: &str) -> String {
    ugly.to_lowercase()
        .split('_')
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Tab-completion filter: keeps entries starting with `start`, ignoring
/// case, in their original order.
pub fn tab_limit<I, S>(candidates: I, start: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let start = start.to_lowercase();
    candidates
        .into_iter()
        .filter(|candidate| candidate.as_ref().to_lowercase().starts_with(&start))
        .map(|candidate| candidate.as_ref().to_string())
        .collect()
}
