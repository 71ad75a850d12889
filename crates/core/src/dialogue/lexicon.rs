//! Fixed yes/no heuristics used while a confirmation is pending.

const YES_WORDS: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "right", "confirm",
    "confirmed", "affirmative", "absolutely", "definitely", "please",
];

const NO_WORDS: &[&str] =
    &["no", "n", "nope", "nah", "not", "wrong", "incorrect", "negative", "never", "don't", "dont"];

const YES_PHRASES: &[&str] = &["go ahead", "sounds good", "do it", "that's right", "looks good"];

const NO_PHRASES: &[&str] = &["change it", "start over", "not quite"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Yes,
    No,
}

/// Reads a yes/no answer out of free text. Mixed or absent markers are `None`.
pub fn classify_reply(text: &str) -> Option<Reply> {
    let normalized = text
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch == '\'' { ch } else { ' ' })
        .collect::<String>();
    let words = normalized.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() {
        return None;
    }
    let joined = format!(" {} ", words.join(" "));

    let yes = words.iter().any(|word| YES_WORDS.contains(word))
        || YES_PHRASES.iter().any(|phrase| joined.contains(&format!(" {phrase} ")));
    let no = words.iter().any(|word| NO_WORDS.contains(word))
        || NO_PHRASES.iter().any(|phrase| joined.contains(&format!(" {phrase} ")));

    match (yes, no) {
        (true, false) => Some(Reply::Yes),
        (false, true) => Some(Reply::No),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_reply, Reply};

    #[test]
    fn plain_answers_are_recognized() {
        assert_eq!(classify_reply("Yes please!"), Some(Reply::Yes));
        assert_eq!(classify_reply("sounds good to me"), Some(Reply::Yes));
        assert_eq!(classify_reply("no"), Some(Reply::No));
        assert_eq!(classify_reply("Nope, that's wrong"), Some(Reply::No));
    }

    #[test]
    fn mixed_or_missing_markers_are_unclear() {
        assert_eq!(classify_reply("yes and no"), None);
        assert_eq!(classify_reply("what time is it"), None);
        assert_eq!(classify_reply("   "), None);
    }
}
