pub const PLACEHOLDER_PROFILE_PIC: &str = "/images/profile_placeholder.png";

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Google-hosted avatars are served tiny unless a size is requested.
pub fn sized_profile_pic(url: &str) -> String {
    if url.contains("googleusercontent.com") && !url.contains('?') {
        format!("{url}?sz=150")
    } else {
        url.to_string()
    }
}

pub fn profile_pic_or_placeholder(url: Option<&str>) -> &str {
    url.filter(|u| !u.is_empty()).unwrap_or(PLACEHOLDER_PROFILE_PIC)
}

/// Database keys may not contain `. # $ [ ] /`.
pub fn presence_key(display_name: &str) -> String {
    let key: String = display_name
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '#' | '$' | '[' | ']' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if key.is_empty() { "_".to_string() } else { key }
}

/// Stable scope name for the conversation between two uids.
pub fn conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}
