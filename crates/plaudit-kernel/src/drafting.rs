use std::time::Duration;

use plaudit_contracts::{Ratings, RATING_COUNT};

pub const SYSTEM_PROMPT: &str = "You write short Google Business reviews on behalf of \
B2B clients of a digital agency. Write in the first person as the client, in a warm \
but professional tone. Mention concrete strengths suggested by the scores and the \
client's own words, and never invent facts, numbers or project names. Keep it between \
40 and 90 words, in one or two paragraphs, with no headings, hashtags, emojis or \
surrounding quotation marks. Return only the review text.";

pub const RATING_LABELS: [&str; RATING_COUNT] = [
    "Initial Kickoff & Goal Understanding",
    "Communication & Responsiveness",
    "Project Planning & Management",
    "Design, Branding & UX",
    "Technical Quality & Performance",
    "Testing & Launch Smoothness",
    "Training, Handover & Support",
    "Overall Satisfaction",
];

const FALLBACK_COMPANY: &str = "a business client";
const FALLBACK_SERVICES: &str = "digital/technology services";

#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub client_name: &'a str,
    pub company: &'a str,
    pub services: &'a str,
    pub avg_rating: f64,
    pub ratings: &'a Ratings,
    pub open_feedback: Option<&'a str>,
}

fn score(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 => format!("{}/10", v as i64),
        Some(v) => format!("{v}/10"),
        None => "N/A".to_string(),
    }
}

fn or_fallback<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

pub fn build_review_prompt(input: &PromptInput<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Write a Google review from {}, representing {}.\n",
        input.client_name.trim(),
        or_fallback(input.company, FALLBACK_COMPANY)
    ));
    prompt.push_str(&format!(
        "Services delivered: {}\n",
        or_fallback(input.services, FALLBACK_SERVICES)
    ));
    prompt.push_str(&format!("Overall rating: {:.1}/10\n\n", input.avg_rating));
    prompt.push_str("Rating breakdown:\n");
    for (label, value) in RATING_LABELS.iter().zip(input.ratings.values()) {
        prompt.push_str(&format!("- {label}: {}\n", score(*value)));
    }
    if let Some(feedback) = input.open_feedback.map(str::trim).filter(|f| !f.is_empty()) {
        prompt.push_str(&format!("\nThe client's own words: \"{feedback}\"\n"));
    }
    prompt.push_str(
        "\nWrite the review now. Focus on the highest-rated areas and keep it natural.",
    );
    prompt
}

/// Trims the model output and removes one layer of wrapping quotes.
pub fn clean_draft(raw: &str) -> String {
    let mut text = raw.trim();
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }
    text.to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn within_band(text: &str, min_words: usize, max_words: usize) -> bool {
    let words = word_count(text);
    words >= min_words && words <= max_words
}

/// Delay before retry `attempt` (zero-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings() -> Ratings {
        Ratings([
            Some(9.0),
            Some(8.5),
            None,
            Some(10.0),
            Some(9.0),
            Some(9.0),
            Some(8.0),
            Some(10.0),
        ])
    }

    #[test]
    fn prompt_lists_every_question_and_fallbacks() {
        let r = ratings();
        let prompt = build_review_prompt(&PromptInput {
            client_name: "Asha",
            company: "",
            services: "  ",
            avg_rating: 9.07,
            ratings: &r,
            open_feedback: None,
        });
        assert!(prompt.contains("from Asha, representing a business client"));
        assert!(prompt.contains("Services delivered: digital/technology services"));
        assert!(prompt.contains("Overall rating: 9.1/10"));
        assert!(prompt.contains("- Communication & Responsiveness: 8.5/10"));
        assert!(prompt.contains("- Project Planning & Management: N/A"));
        assert!(prompt.contains("- Overall Satisfaction: 10/10"));
        assert!(!prompt.contains("own words"));
    }

    #[test]
    fn prompt_embeds_feedback_when_present() {
        let r = ratings();
        let prompt = build_review_prompt(&PromptInput {
            client_name: "Asha",
            company: "Rao Logistics",
            services: "Web platform",
            avg_rating: 9.0,
            ratings: &r,
            open_feedback: Some("  Loved the launch week  "),
        });
        assert!(prompt.contains("representing Rao Logistics"));
        assert!(prompt.contains("\"Loved the launch week\""));
    }

    #[test]
    fn clean_draft_strips_wrapping_quotes() {
        assert_eq!(clean_draft("  \"Great team.\"  "), "Great team.");
        assert_eq!(clean_draft("'Great team.'"), "Great team.");
        assert_eq!(clean_draft("\"'Nested'\""), "Nested");
        assert_eq!(clean_draft("They said \"wow\""), "They said \"wow\"");
        assert_eq!(clean_draft("\""), "\"");
    }

    #[test]
    fn word_band_is_inclusive() {
        let fifteen = vec!["word"; 15].join(" ");
        assert!(within_band(&fifteen, 15, 100));
        assert!(!within_band("too short", 15, 100));
        let long = vec!["word"; 101].join(" ");
        assert!(!within_band(&long, 15, 100));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
    }
}
