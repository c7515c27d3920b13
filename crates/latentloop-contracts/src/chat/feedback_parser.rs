use thiserror::Error;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

/// A validated `"<index> <score>"` reply. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    pub index: usize,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    #[error("expected two numbers separated by one space")]
    Malformed,
    #[error("image number must be between 1 and {candidates}")]
    IndexOutOfRange { candidates: usize },
    #[error("score must be between 1 and 10")]
    ScoreOutOfRange,
    #[error("image {index} already has a score")]
    AlreadyScored { index: usize },
}

/// Parses feedback for a round of `candidates` images.
///
/// Only the outer whitespace is forgiving; the separator must be exactly one
/// space and both fields plain decimal digits.
pub fn parse_feedback(text: &str, candidates: usize) -> Result<Feedback, FeedbackError> {
    let trimmed = text.trim();
    let Some((index_raw, score_raw)) = trimmed.split_once(' ') else {
        return Err(FeedbackError::Malformed);
    };
    let index = parse_decimal(index_raw).ok_or(FeedbackError::Malformed)?;
    let score = parse_decimal(score_raw).ok_or(FeedbackError::Malformed)?;

    if index < 1 || index > candidates {
        return Err(FeedbackError::IndexOutOfRange { candidates });
    }
    if score < usize::from(MIN_SCORE) || score > usize::from(MAX_SCORE) {
        return Err(FeedbackError::ScoreOutOfRange);
    }
    Ok(Feedback {
        index,
        score: score as u8,
    })
}

fn parse_decimal(raw: &str) -> Option<usize> {
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    raw.parse::<usize>().ok()
}
