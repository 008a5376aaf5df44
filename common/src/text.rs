/// Keeps the first `visible` characters of a secret and replaces the rest.
pub fn mask_secret(s: &str, visible: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= visible {
        "*".repeat(char_count)
    } else {
        let shown: String = s.chars().take(visible).collect();
        let hidden = char_count - visible;
        format!("{shown}...({hidden} chars hidden)")
    }
}

/// Replaces every occurrence of `secret` in `text` with its masked form.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, &mask_secret(secret, 4))
}
