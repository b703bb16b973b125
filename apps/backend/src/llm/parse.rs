//! Free-text decision parsing.

use crate::domain::Decision;

/// Extract a decision from a completion response.
///
/// The first non-empty line is searched case-insensitively for the literal
/// tokens `WITHDRAW` or `KEEP`; the whole response is searched as a
/// fallback. `WITHDRAW` wins when both tokens appear in the same scope.
pub fn parse_decision(text: &str) -> Option<Decision> {
    let first_line = text.lines().map(str::trim).find(|line| !line.is_empty())?;

    if let Some(decision) = scan(first_line) {
        return Some(decision);
    }
    scan(text)
}

fn scan(text: &str) -> Option<Decision> {
    let upper = text.to_uppercase();
    if upper.contains("WITHDRAW") {
        Some(Decision::Withdraw)
    } else if upper.contains("KEEP") {
        Some(Decision::Keep)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_token_wins() {
        assert_eq!(
            parse_decision("WITHDRAW\nbecause reasons"),
            Some(Decision::Withdraw)
        );
        assert_eq!(parse_decision("keep"), Some(Decision::Keep));
        assert_eq!(parse_decision("  Keep  \n"), Some(Decision::Keep));
    }

    #[test]
    fn falls_back_to_whole_text() {
        assert_eq!(
            parse_decision("After thinking about it...\nI will KEEP my deposit."),
            Some(Decision::Keep)
        );
    }

    #[test]
    fn withdraw_wins_when_both_tokens_appear() {
        assert_eq!(
            parse_decision("I could keep, but I WITHDRAW."),
            Some(Decision::Withdraw)
        );
    }

    #[test]
    fn unparseable_text_is_none() {
        assert_eq!(parse_decision("I pass this round."), None);
        assert_eq!(parse_decision("   \n \n"), None);
        assert_eq!(parse_decision(""), None);
    }
}
