//! Sentence and paragraph boundary detection.
//!
//! The sentence rule mirrors the classic regex heuristic: a terminator
//! (`.`, `!`, `?`) followed by whitespace and an uppercase letter ends a
//! sentence, unless the word before the terminator looks like an
//! abbreviation ("Dr.", "e.g.", a single initial).

/// Split `text` into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;

    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '.' | '!' | '?') && is_boundary(&chars, i) {
            let sentence: String = chars[start..=i].iter().collect();
            push_trimmed(&mut sentences, &sentence);
            // Skip the whitespace run after the terminator.
            let mut next = i + 1;
            while next < chars.len() && chars[next].is_whitespace() {
                next += 1;
            }
            start = next;
            i = next;
        } else {
            i += 1;
        }
    }

    if start < chars.len() {
        let tail: String = chars[start..].iter().collect();
        push_trimmed(&mut sentences, &tail);
    }

    sentences
}

/// Split `text` into trimmed, non-empty paragraphs on blank-line runs.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(current.trim().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    paragraphs
}

/// `true` when the line opens a markdown-style heading (`#` through `######`).
pub fn is_heading_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && trimmed
            .chars()
            .nth(hashes)
            .is_some_and(|c| c.is_whitespace())
}

fn is_boundary(chars: &[char], index: usize) -> bool {
    // Must be followed by whitespace and then an uppercase letter.
    let mut next = index + 1;
    if next >= chars.len() || !chars[next].is_whitespace() {
        return false;
    }
    while next < chars.len() && chars[next].is_whitespace() {
        next += 1;
    }
    if next >= chars.len() || !chars[next].is_uppercase() {
        return false;
    }

    if chars[index] != '.' {
        return true;
    }

    // Abbreviation guard: the word ending at this period.
    let mut word_start = index;
    while word_start > 0 && !chars[word_start - 1].is_whitespace() {
        word_start -= 1;
    }
    let word: String = chars[word_start..index].iter().collect();
    !is_abbreviation(&word)
}

fn is_abbreviation(word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    // Internal period: "e.g", "i.e", "U.S".
    if word.contains('.') {
        return true;
    }
    // Single initial: "A." in "A. Turing".
    if word.chars().count() == 1 && word.chars().all(|c| c.is_uppercase()) {
        return true;
    }
    // Two-letter capitalized abbreviations: "Mr", "Dr", "St".
    let mut chars = word.chars();
    let starts_upper = chars.next().is_some_and(|c| c.is_uppercase());
    starts_upper && word.chars().count() == 2 && word.chars().skip(1).all(|c| c.is_lowercase())
}

fn push_trimmed(sentences: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_sentences() {
        let sentences = split_sentences("Fact one. Fact two. Fact three.");
        assert_eq!(sentences, vec!["Fact one.", "Fact two.", "Fact three."]);
    }

    #[test]
    fn requires_uppercase_after_terminator() {
        let sentences = split_sentences("The value is 3.14 and that is fine. Next sentence.");
        assert_eq!(
            sentences,
            vec!["The value is 3.14 and that is fine.", "Next sentence."]
        );
    }

    #[test]
    fn keeps_abbreviations_together() {
        let sentences = split_sentences("Dr. Smith wrote the chapter. It covers traits.");
        assert_eq!(
            sentences,
            vec!["Dr. Smith wrote the chapter.", "It covers traits."]
        );

        let sentences = split_sentences("Use iterators, e.g. Map and Filter. They compose.");
        assert_eq!(
            sentences,
            vec!["Use iterators, e.g. Map and Filter.", "They compose."]
        );
    }

    #[test]
    fn keeps_initials_together() {
        let sentences = split_sentences("A. Turing proved it. The rest followed.");
        assert_eq!(sentences, vec!["A. Turing proved it.", "The rest followed."]);
    }

    #[test]
    fn handles_exclamations_and_questions() {
        let sentences = split_sentences("Really! Does it work? Yes.");
        assert_eq!(sentences, vec!["Really!", "Does it work?", "Yes."]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n  ").is_empty());
    }

    #[test]
    fn unterminated_tail_is_kept() {
        let sentences = split_sentences("First part. trailing fragment without end");
        assert_eq!(
            sentences,
            vec!["First part. trailing fragment without end"]
        );
    }

    #[test]
    fn paragraph_split_on_blank_runs() {
        let paragraphs = split_paragraphs("First block.\n\nSecond block.\n\n\n\nThird block.");
        assert_eq!(paragraphs, vec!["First block.", "Second block.", "Third block."]);
    }

    #[test]
    fn heading_lines_detected() {
        assert!(is_heading_line("# Title"));
        assert!(is_heading_line("###### Deep"));
        assert!(!is_heading_line("####### Too deep"));
        assert!(!is_heading_line("#NoSpace"));
        assert!(!is_heading_line("Plain text"));
    }
}
