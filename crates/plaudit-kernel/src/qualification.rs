use plaudit_contracts::{AlertReason, FormSubmission, Ratings, RawRating, RATING_COUNT};

/// Phrases that flag a response as negative despite high scores.
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "terrible",
    "horrible",
    "awful",
    "worst",
    "never again",
    "disappointed",
    "waste of time",
    "waste of money",
    "regret",
    "unprofessional",
    "scam",
    "fraud",
    "do not recommend",
    "stay away",
    "avoid",
    "disaster",
];

const MIN_RATING: f64 = 1.0;
const MAX_RATING: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct QualificationPolicy {
    pub rating_threshold: f64,
    pub negative_keywords: Vec<String>,
}

impl Default for QualificationPolicy {
    fn default() -> Self {
        Self {
            rating_threshold: 8.0,
            negative_keywords: NEGATIVE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Qualification {
    pub avg_rating: f64,
    pub rating_ok: bool,
    pub consent_ok: bool,
    pub negative_sentiment: bool,
    pub qualified: bool,
}

impl Qualification {
    pub fn alert_reason(&self) -> Option<AlertReason> {
        if self.qualified {
            None
        } else if !self.rating_ok {
            Some(AlertReason::LowRating)
        } else if !self.consent_ok {
            Some(AlertReason::ConsentDeclined)
        } else {
            Some(AlertReason::NegativeSentiment)
        }
    }
}

/// Values outside 1–10, non-numeric text and non-finite numbers are unparseable.
pub fn parse_rating(raw: &RawRating) -> Option<f64> {
    let value = match raw {
        RawRating::Number(v) => *v,
        RawRating::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
    };
    if value.is_finite() && (MIN_RATING..=MAX_RATING).contains(&value) {
        Some(value)
    } else {
        None
    }
}

pub fn ratings_from_form(form: &FormSubmission) -> Ratings {
    let mut values = [None; RATING_COUNT];
    for (slot, raw) in values.iter_mut().zip(form.raw_ratings()) {
        *slot = raw.and_then(parse_rating);
    }
    Ratings(values)
}

pub fn average(ratings: &[Option<f64>]) -> f64 {
    let valid: Vec<f64> = ratings
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite() && (MIN_RATING..=MAX_RATING).contains(v))
        .collect();
    if valid.is_empty() {
        return 0.0;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    (mean * 100.0).round() / 100.0
}

pub fn meets_threshold(avg_rating: f64, threshold: f64) -> bool {
    avg_rating >= threshold
}

pub fn has_consent(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("yes")
}

pub fn has_negative_sentiment<S: AsRef<str>>(text: &str, keywords: &[S]) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.as_ref().to_lowercase())
        .any(|k| !k.is_empty() && lowered.contains(&k))
}

pub fn evaluate(
    policy: &QualificationPolicy,
    ratings: &Ratings,
    consent_raw: &str,
    open_feedback: Option<&str>,
) -> Qualification {
    let avg_rating = average(ratings.values());
    let rating_ok = meets_threshold(avg_rating, policy.rating_threshold);
    let consent_ok = has_consent(consent_raw);
    let negative_sentiment =
        has_negative_sentiment(open_feedback.unwrap_or(""), &policy.negative_keywords);
    Qualification {
        avg_rating,
        rating_ok,
        consent_ok,
        negative_sentiment,
        qualified: rating_ok && consent_ok && !negative_sentiment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: f64) -> Ratings {
        Ratings([Some(value); RATING_COUNT])
    }

    #[test]
    fn average_of_no_valid_entries_is_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[None, None, None]), 0.0);
        assert_eq!(average(&[Some(f64::NAN), Some(42.0), None]), 0.0);
    }

    #[test]
    fn average_ignores_missing_and_rounds_to_two_places() {
        assert_eq!(average(&[Some(9.0), None, Some(8.0), Some(8.0)]), 8.33);
        assert_eq!(average(&[Some(10.0), Some(9.0)]), 9.5);
        assert_eq!(average(&[Some(7.0), Some(7.0), Some(8.0)]), 7.33);
    }

    #[test]
    fn average_is_order_invariant() {
        let ratings = [Some(9.0), Some(7.5), None, Some(8.25), Some(10.0), Some(6.0)];
        let expected = average(&ratings);
        let mut reversed = ratings;
        reversed.reverse();
        assert_eq!(average(&reversed), expected);
        let mut rotated = ratings;
        rotated.rotate_left(2);
        assert_eq!(average(&rotated), expected);
    }

    #[test]
    fn text_ratings_are_parsed_and_junk_ignored() {
        assert_eq!(parse_rating(&RawRating::Text(" 9 ".to_string())), Some(9.0));
        assert_eq!(parse_rating(&RawRating::Text("".to_string())), None);
        assert_eq!(parse_rating(&RawRating::Text("great".to_string())), None);
        assert_eq!(parse_rating(&RawRating::Number(11.0)), None);
        assert_eq!(parse_rating(&RawRating::Number(0.0)), None);
    }

    #[test]
    fn consent_is_trimmed_and_case_insensitive() {
        assert!(has_consent("Yes"));
        assert!(has_consent("  yEs "));
        assert!(!has_consent("Yes please"));
        assert!(!has_consent("No"));
        assert!(!has_consent(""));
    }

    #[test]
    fn negative_sentiment_uses_substring_match() {
        assert!(has_negative_sentiment(
            "Honestly the worst experience",
            NEGATIVE_KEYWORDS
        ));
        assert!(has_negative_sentiment("I DO NOT RECOMMEND them", NEGATIVE_KEYWORDS));
        assert!(!has_negative_sentiment("Fantastic team", NEGATIVE_KEYWORDS));
        assert!(!has_negative_sentiment("   ", NEGATIVE_KEYWORDS));
    }

    #[test]
    fn qualification_covers_all_condition_combinations() {
        let policy = QualificationPolicy::default();
        for rating_ok in [false, true] {
            for consent_ok in [false, true] {
                for negative in [false, true] {
                    let ratings = if rating_ok { uniform(9.0) } else { uniform(6.0) };
                    let consent = if consent_ok { "Yes" } else { "No" };
                    let feedback = if negative {
                        Some("a total scam")
                    } else {
                        Some("great work")
                    };
                    let q = evaluate(&policy, &ratings, consent, feedback);
                    assert_eq!(q.rating_ok, rating_ok);
                    assert_eq!(q.consent_ok, consent_ok);
                    assert_eq!(q.negative_sentiment, negative);
                    assert_eq!(
                        q.qualified,
                        rating_ok && consent_ok && !negative,
                        "rating_ok={rating_ok} consent_ok={consent_ok} negative={negative}"
                    );
                    assert_eq!(q.alert_reason().is_none(), q.qualified);
                }
            }
        }
    }

    #[test]
    fn alert_reason_prefers_rating_then_consent() {
        let policy = QualificationPolicy::default();
        let low = evaluate(&policy, &uniform(6.0), "Yes", Some("worst"));
        assert_eq!(low.alert_reason(), Some(AlertReason::LowRating));
        let no_consent = evaluate(&policy, &uniform(9.0), "No", None);
        assert_eq!(no_consent.alert_reason(), Some(AlertReason::ConsentDeclined));
        let negative = evaluate(&policy, &uniform(9.0), "Yes", Some("worst experience"));
        assert_eq!(negative.alert_reason(), Some(AlertReason::NegativeSentiment));
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(meets_threshold(8.0, 8.0));
        assert!(!meets_threshold(7.99, 8.0));
    }
}
