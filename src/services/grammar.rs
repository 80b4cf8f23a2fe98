//! Per-state input grammar. Pure: no storage, no transport.

use crate::models::SessionState;
use crate::services::cancel_code;

const RESET_WORDS: &[&str] = &["menu", "menü"];
const GREETINGS: &[&str] = &["merhaba", "selam", "hi", "hello", "hey", "start"];
const YES_WORDS: &[&str] = &["e", "evet", "yes", "y", "ok", "tamam"];
const NO_WORDS: &[&str] = &["h", "hayır", "hayir", "no", "n"];
const TODAY_WORDS: &[&str] = &["1", "bugün", "bugun", "today"];
const TOMORROW_WORDS: &[&str] = &["2", "yarın", "yarin", "tomorrow"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reset,
    Book,
    MyAppointments,
    Cancel,
    /// 1-based position in the service list.
    PickService(usize),
    PickDay(DayChoice),
    /// 1-based position in the slot list.
    PickTime(usize),
    Yes,
    No,
    /// 1-based position in the cancel candidates.
    CancelByIndex(usize),
    CancelByCode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayChoice {
    Today,
    Tomorrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    NotUnderstood,
    CodeTooShort,
}

/// Trims, collapses inner whitespace and lowercases.
pub fn normalize_input(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_reset(normalized: &str) -> bool {
    normalized.is_empty() || RESET_WORDS.contains(&normalized) || GREETINGS.contains(&normalized)
}

/// `"s3"`, `"s 3"` or `"3"` → 3. Zero and anything else → `None`.
fn parse_index(normalized: &str, prefix: char) -> Option<usize> {
    let digits = normalized.strip_prefix(prefix).unwrap_or(normalized).trim_start();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n > 0)
}

pub fn parse(state: SessionState, raw: &str) -> Result<Command, InputError> {
    let input = normalize_input(raw);
    if is_reset(&input) {
        return Ok(Command::Reset);
    }

    match state {
        SessionState::Menu => match input.as_str() {
            "1" => Ok(Command::Book),
            "2" => Ok(Command::MyAppointments),
            "3" => Ok(Command::Cancel),
            _ => Err(InputError::NotUnderstood),
        },
        SessionState::ChooseService => parse_index(&input, 's')
            .map(Command::PickService)
            .ok_or(InputError::NotUnderstood),
        SessionState::ChooseDate => {
            if TODAY_WORDS.contains(&input.as_str()) {
                Ok(Command::PickDay(DayChoice::Today))
            } else if TOMORROW_WORDS.contains(&input.as_str()) {
                Ok(Command::PickDay(DayChoice::Tomorrow))
            } else {
                Err(InputError::NotUnderstood)
            }
        }
        SessionState::ChooseTime => parse_index(&input, 't')
            .map(Command::PickTime)
            .ok_or(InputError::NotUnderstood),
        SessionState::Confirm => {
            if YES_WORDS.contains(&input.as_str()) {
                Ok(Command::Yes)
            } else if NO_WORDS.contains(&input.as_str()) {
                Ok(Command::No)
            } else {
                Err(InputError::NotUnderstood)
            }
        }
        SessionState::CancelWait => {
            // list positions are at most two digits; codes are longer
            if input.len() <= 2 {
                if let Some(index) = parse_index(&input, '#') {
                    return Ok(Command::CancelByIndex(index));
                }
            }
            let code = cancel_code::normalize(&input);
            if code.len() < cancel_code::MIN_CODE_LENGTH {
                Err(InputError::CodeTooShort)
            } else {
                Ok(Command::CancelByCode(code))
            }
        }
    }
}
