//! Call transcript classification.
//!
//! Decides from a call transcript whether a listing is still available. The
//! decision is an ordered table of tiers; the first tier that matches wins:
//!
//! 0. failed call (handled by [`classify_call`])
//! 1. a short yes/no answer attributable to the respondent
//! 2. hedged or uncertain language
//! 3. negated availability ("no longer available")
//! 4. affirmed availability ("still available")
//! 5. unavailable keywords (sold, rented, ...)
//! 6. available keywords
//! 7. deferral keywords ("let me check")
//! 8. fallback: unsure
//!
//! Uncertainty is checked before any availability phrase so that "maybe it's
//! available" is never read as a confirmation.
//!
//! Phrases match on whole words only: "let" does not match "letting".

use serde::{Deserialize, Serialize};

use crate::models::call::CallRecord;
use crate::models::verification::{ListingType, VerificationStatus};

/// Confidence of a short, attributable yes/no answer.
const DIRECT_ANSWER_CONFIDENCE: f64 = 0.9;

/// Confidence when nothing usable was said.
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Longest respondent utterance (in words) still treated as a direct answer.
const DIRECT_ANSWER_MAX_WORDS: usize = 4;

/// Unsure results on transcripts shorter than this go to manual review.
const REVIEW_LENGTH_THRESHOLD: usize = 100;

// ── Tier 1: direct answers ──────────────────────────────────────────────

const YES_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "yea", "aye", "correct", "absolutely", "definitely",
];

const YES_FILLERS: &[&str] = &[
    "it", "is", "it's", "its", "still", "sure", "sir", "madam", "indeed", "certainly", "of",
    "course", "thanks", "oh", "uh", "um", "that's", "right",
];

const NO_WORDS: &[&str] = &["no", "nope", "nah", "negative"];

const NO_FILLERS: &[&str] = &[
    "it", "is", "it's", "its", "not", "isn't", "sorry", "sir", "madam", "oh", "uh", "um",
    "afraid", "i'm", "thanks",
];

/// Speaker labels used by the respondent (the listing agent).
const RESPONDENT_LABELS: &[&str] = &["user", "agent", "human", "callee", "respondent"];

/// Speaker labels used by the calling assistant.
const CALLER_LABELS: &[&str] = &["assistant", "ai", "bot", "caller"];

// ── Tier 2: uncertainty ─────────────────────────────────────────────────

const UNCERTAINTY_PHRASES: &[&str] = &[
    "maybe",
    "not sure",
    "i think",
    "might be",
    "not certain",
    "not entirely sure",
    "not completely sure",
    "i believe",
    "perhaps",
    "possibly",
    "probably",
    "i guess",
    "could be",
];

// ── Tier 3: negated availability ────────────────────────────────────────

const NEGATION_PHRASES: &[&str] = &[
    "no longer available",
    "not available",
    "isn't available",
    "is not available",
    "not on the market",
    "no longer on the market",
    "no longer listed",
    "no availability",
    "can't find",
    "cannot find",
    "couldn't find",
    "don't have it",
    "don't have that",
    "don't have it anymore",
    "we don't have",
    "not anymore",
    "no longer have",
    "already gone",
    "found a tenant",
    "found a buyer",
];

// ── Tier 4: affirmed availability ───────────────────────────────────────

const AFFIRMATION_PHRASES: &[&str] = &[
    "still have",
    "still available",
    "actively marketing",
    "still on the market",
    "still listed",
    "still for sale",
    "still for rent",
    "still selling",
    "still letting",
    "still on our rental list",
    "still on our books",
    "ready to rent",
    "arrange a viewing",
    "schedule a viewing",
    "book a viewing",
];

// ── Tier 5: unavailable keywords ────────────────────────────────────────

const UNAVAILABLE_KEYWORDS: &[&str] = &[
    "sold",
    "rented",
    "rented out",
    "been let",
    "already let",
    "let agreed",
    "under offer",
    "sale agreed",
    "off market",
    "off the market",
    "withdrawn",
    "delisted",
    "taken off",
    "unavailable",
];

// ── Tier 6: available keywords ──────────────────────────────────────────

const AVAILABLE_KEYWORDS: &[&str] = &[
    "available",
    "still listed",
    "for sale",
    "for rent",
    "to let",
    "on the market",
    "currently listed",
    "viewing",
    "viewings",
];

// ── Tier 7: unsure keywords ─────────────────────────────────────────────

const UNSURE_KEYWORDS: &[&str] = &[
    "not sure",
    "let me check",
    "need to check",
    "have to check",
    "need to verify",
    "get back to you",
    "call you back",
    "don't know",
    "no idea",
    "can't say",
    "check our website",
    "check our system",
];

/// Classifier verdict, independent of listing type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable,
    Unsure,
}

/// Which tier of the decision table produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    DirectAnswer,
    Uncertainty,
    Negation,
    Affirmation,
    UnavailableKeyword,
    AvailableKeyword,
    UnsureKeyword,
    Fallback,
}

/// A classifier decision with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub availability: Availability,
    pub confidence: f64,
    pub tier: Tier,
}

/// Classify a transcript. Deterministic and free of side effects.
///
/// The listing type does not change the verdict; it only matters when the verdict
/// is turned into a [`VerificationStatus`] (see [`to_status`]).
pub fn classify(transcript: Option<&str>, _listing_type: ListingType) -> Classification {
    let raw = match transcript.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return verdict(Availability::Unsure, FALLBACK_CONFIDENCE, Tier::Fallback),
    };

    let len = raw.chars().count() as f64;
    let firm = (0.7 + len / 1000.0).min(0.95);
    let hedged = (0.3 + len / 2000.0).min(0.6);

    let turns = speaker_turns(raw);
    if let Some(availability) = direct_answer(&turns) {
        return verdict(availability, DIRECT_ANSWER_CONFIDENCE, Tier::DirectAnswer);
    }

    // Only the respondent's words count; the caller's own question would
    // otherwise read as "still available".
    let respondent: Vec<&str> = turns
        .iter()
        .filter(|t| t.speaker == Speaker::Respondent)
        .map(|t| t.text.as_str())
        .collect();
    let text = normalize(&respondent.join(" "));

    if contains_any(&text, UNCERTAINTY_PHRASES) {
        return verdict(Availability::Unsure, hedged, Tier::Uncertainty);
    }
    if contains_any(&text, NEGATION_PHRASES) {
        return verdict(Availability::Unavailable, firm, Tier::Negation);
    }
    if contains_any(&text, AFFIRMATION_PHRASES) {
        return verdict(Availability::Available, firm, Tier::Affirmation);
    }
    if contains_any(&text, UNAVAILABLE_KEYWORDS) {
        return verdict(Availability::Unavailable, firm, Tier::UnavailableKeyword);
    }
    if contains_any(&text, AVAILABLE_KEYWORDS) {
        return verdict(Availability::Available, firm, Tier::AvailableKeyword);
    }
    if contains_any(&text, UNSURE_KEYWORDS) {
        return verdict(Availability::Unsure, hedged, Tier::UnsureKeyword);
    }

    verdict(Availability::Unsure, FALLBACK_CONFIDENCE, Tier::Fallback)
}

/// Classify a finished call: failed calls bypass the transcript entirely.
pub fn classify_call(record: &CallRecord, listing_type: ListingType) -> (VerificationStatus, f64) {
    if record.status.is_failure() {
        return (VerificationStatus::Failed, 0.0);
    }
    let transcript = record.transcript.as_deref();
    let classification = classify(transcript, listing_type);
    (
        to_status(classification.availability, listing_type, transcript),
        classification.confidence,
    )
}

/// Turn a verdict into the status stored for the property.
///
/// Unavailable rentals are `Rented`, unavailable sales `Sold`. Unsure answers on a
/// short, non-empty transcript are flagged for manual review.
pub fn to_status(
    availability: Availability,
    listing_type: ListingType,
    transcript: Option<&str>,
) -> VerificationStatus {
    match availability {
        Availability::Available => VerificationStatus::Available,
        Availability::Unavailable => match listing_type {
            ListingType::Rent => VerificationStatus::Rented,
            ListingType::Sale => VerificationStatus::Sold,
        },
        Availability::Unsure => {
            let len = transcript.map(|t| t.trim().chars().count()).unwrap_or(0);
            if len > 0 && len < REVIEW_LENGTH_THRESHOLD {
                VerificationStatus::PendingReview
            } else {
                VerificationStatus::Unclear
            }
        }
    }
}

/// First three sentences of the transcript, used as the agent's response summary.
pub fn summarize_response(transcript: &str) -> String {
    let parts: Vec<&str> = transcript
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(3)
        .collect();

    if parts.is_empty() {
        return "No response received".to_string();
    }

    let mut summary = parts.join(". ");
    if !summary.ends_with(['.', '?', '!']) {
        summary.push('.');
    }
    summary
}

fn verdict(availability: Availability, confidence: f64, tier: Tier) -> Classification {
    Classification {
        availability,
        confidence,
        tier,
    }
}

/// Lowercase, fold curly apostrophes, and reduce to single-space separated words
/// padded with a space on both sides so phrases can be matched as " phrase ".
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in text.chars() {
        let c = match c {
            '\u{2019}' | '\u{2018}' | '`' => '\'',
            other => other,
        };
        if c.is_alphanumeric() || c == '\'' {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

fn contains_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases
        .iter()
        .any(|phrase| normalized.contains(&format!(" {} ", phrase)))
}

/// Tier 1. The respondent's answer to the caller's availability question must be
/// a short utterance built from a single polarity family plus filler words, and
/// nothing the respondent says afterwards may contradict it.
fn direct_answer(turns: &[Turn]) -> Option<Availability> {
    let answer_at = answer_turn(turns)?;
    let availability = yes_or_no(&turns[answer_at].text)?;

    let later: Vec<&Turn> = turns[answer_at + 1..]
        .iter()
        .filter(|t| t.speaker == Speaker::Respondent)
        .collect();
    let later_text = normalize(
        &later.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" "),
    );
    let reversed = later
        .iter()
        .any(|t| yes_or_no(&t.text).is_some_and(|a| a != availability));

    let contradicted = reversed
        || contains_any(&later_text, UNCERTAINTY_PHRASES)
        || match availability {
            Availability::Available => {
                contains_any(&later_text, NEGATION_PHRASES)
                    || contains_any(&later_text, UNAVAILABLE_KEYWORDS)
            }
            _ => contains_any(&later_text, AFFIRMATION_PHRASES),
        };
    (!contradicted).then_some(availability)
}

/// Index of the respondent turn answering the caller. That is the first respondent
/// turn after the last caller question about availability (or, failing that, the
/// last caller question that got a reply). Without caller questions it is the
/// respondent's last turn.
fn answer_turn(turns: &[Turn]) -> Option<usize> {
    let replied = |q: usize| {
        turns[q + 1..]
            .iter()
            .position(|t| t.speaker == Speaker::Respondent)
            .map(|offset| q + 1 + offset)
    };
    let questions: Vec<usize> = turns
        .iter()
        .enumerate()
        .filter(|(_, t)| t.speaker == Speaker::Caller && t.text.contains('?'))
        .map(|(i, _)| i)
        .filter(|&i| replied(i).is_some())
        .collect();

    if questions.is_empty() {
        return turns.iter().rposition(|t| t.speaker == Speaker::Respondent);
    }

    let about_availability = questions.iter().rev().copied().find(|&q| {
        let text = normalize(&turns[q].text);
        contains_any(&text, AFFIRMATION_PHRASES) || contains_any(&text, AVAILABLE_KEYWORDS)
    });
    let question = about_availability.or_else(|| questions.last().copied())?;
    replied(question)
}

fn yes_or_no(utterance: &str) -> Option<Availability> {
    let normalized = normalize(utterance);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() || words.len() > DIRECT_ANSWER_MAX_WORDS {
        return None;
    }

    let only = |family: &[&str], fillers: &[&str]| {
        words.iter().any(|w| family.contains(w))
            && words.iter().all(|w| family.contains(w) || fillers.contains(w))
    };

    if only(NO_WORDS, NO_FILLERS) {
        Some(Availability::Unavailable)
    } else if only(YES_WORDS, YES_FILLERS) {
        Some(Availability::Available)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speaker {
    Caller,
    Respondent,
}

/// One speaker turn, whitespace collapsed.
#[derive(Debug, Clone, PartialEq)]
struct Turn {
    speaker: Speaker,
    text: String,
}

/// Split a transcript into speaker turns.
///
/// A known `label:` starts a turn at the start of the text, of a line, or after
/// sentence punctuation, so single-line transcripts split too. Everything up to
/// the next label belongs to the turn, continuation lines included. Text before
/// the first label is not attributed. A transcript without labels is one
/// respondent turn.
fn speaker_turns(transcript: &str) -> Vec<Turn> {
    // ASCII lowercasing keeps byte offsets aligned with `transcript`
    let lower = transcript.to_ascii_lowercase();
    let markers: Vec<(usize, usize, Speaker)> = lower
        .char_indices()
        .filter(|&(at, _)| at_turn_boundary(&lower[..at]))
        .filter_map(|(at, _)| label_at(&lower[at..]).map(|(len, speaker)| (at, at + len, speaker)))
        .collect();

    if markers.is_empty() {
        let text = collapse_whitespace(transcript);
        return if text.is_empty() {
            Vec::new()
        } else {
            vec![Turn {
                speaker: Speaker::Respondent,
                text,
            }]
        };
    }

    markers
        .iter()
        .enumerate()
        .filter_map(|(i, &(_, text_start, speaker))| {
            let end = markers.get(i + 1).map_or(transcript.len(), |next| next.0);
            let text = collapse_whitespace(&transcript[text_start..end]);
            (!text.is_empty()).then_some(Turn { speaker, text })
        })
        .collect()
}

fn at_turn_boundary(before: &str) -> bool {
    match before.trim_end_matches([' ', '\t']).chars().last() {
        None => true,
        Some(c) => matches!(c, '\n' | '\r' | '.' | '?' | '!'),
    }
}

/// A known speaker label followed by `:` at the start of `text`. Returns the
/// length up to and including the colon.
fn label_at(text: &str) -> Option<(usize, Speaker)> {
    let labels = RESPONDENT_LABELS
        .iter()
        .map(|l| (*l, Speaker::Respondent))
        .chain(CALLER_LABELS.iter().map(|l| (*l, Speaker::Caller)));

    for (label, speaker) in labels {
        let Some(after) = text.strip_prefix(label) else {
            continue;
        };
        let spaced = after.trim_start_matches([' ', '\t']);
        if spaced.starts_with(':') {
            return Some((text.len() - spaced.len() + 1, speaker));
        }
    }
    None
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
